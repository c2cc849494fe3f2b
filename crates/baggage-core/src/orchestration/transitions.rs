//! The lifecycle transition table.
//!
//! Node work produces a [`Signal`]; this module maps `(node, signal)` to the
//! next node and nothing else. Forced moves to `mishandled` (fatal outcomes)
//! bypass the table.

use crate::error::BaggageError;
use crate::models::{ApprovalOutcome, Node};

/// The fact a node's work established, as far as routing is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    /// Unconditional edge.
    Done,
    /// Sorting: equipment healthy, or an alternate route was found.
    Routable,
    /// In flight: whether a hub transfer is still ahead.
    PendingConnection(bool),
    /// Transfer: connection made within the deadline.
    ConnectionMade,
    /// Arrival: whether the bag was located.
    Located(bool),
    /// Claim / compensation: whether a human sign-off is required.
    RequiresApproval(bool),
    /// Wait approval: the resolved request's outcome.
    Approval(ApprovalOutcome),
}

pub fn next_node(from: Node, signal: Signal) -> Result<Node, BaggageError> {
    use Signal::*;

    let to = match (from, signal) {
        (Node::CheckIn, Done) => Node::SecurityScreening,
        (Node::SecurityScreening, Done) => Node::Sorting,
        (Node::Sorting, Routable) => Node::Loading,
        (Node::Loading, Done) => Node::InFlight,
        (Node::InFlight, PendingConnection(false)) => Node::Arrival,
        (Node::InFlight, PendingConnection(true)) => Node::Transfer,
        (Node::Transfer, ConnectionMade) => Node::Sorting,
        (Node::Arrival, Located(true)) => Node::Claim,
        (Node::Arrival, Located(false)) => Node::Mishandled,
        (Node::Claim, RequiresApproval(false)) => Node::Delivered,
        (Node::Claim, RequiresApproval(true)) => Node::RequestApproval,
        (Node::Mishandled, Done) => Node::RootCauseAnalysis,
        (Node::RootCauseAnalysis, Done) => Node::Compensation,
        (Node::Compensation, RequiresApproval(false)) => Node::Delivered,
        (Node::Compensation, RequiresApproval(true)) => Node::RequestApproval,
        (Node::RequestApproval, Done) => Node::WaitApproval,
        (Node::WaitApproval, Approval(ApprovalOutcome::Approved)) => Node::Delivered,
        (Node::WaitApproval, Approval(_)) => Node::Mishandled,
        (from, signal) => {
            return Err(BaggageError::Internal(format!(
                "no transition from {} on {:?}",
                from, signal
            )))
        }
    };
    Ok(to)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_edges() {
        let mut node = Node::CheckIn;
        let signals = [
            Signal::Done,
            Signal::Done,
            Signal::Routable,
            Signal::Done,
            Signal::PendingConnection(false),
            Signal::Located(true),
            Signal::RequiresApproval(false),
        ];
        let mut visited = vec![node];
        for signal in signals {
            node = next_node(node, signal).unwrap();
            visited.push(node);
        }
        assert_eq!(
            visited,
            vec![
                Node::CheckIn,
                Node::SecurityScreening,
                Node::Sorting,
                Node::Loading,
                Node::InFlight,
                Node::Arrival,
                Node::Claim,
                Node::Delivered,
            ]
        );
    }

    #[test]
    fn test_approval_routing() {
        assert_eq!(
            next_node(Node::WaitApproval, Signal::Approval(ApprovalOutcome::Approved)).unwrap(),
            Node::Delivered
        );
        assert_eq!(
            next_node(Node::WaitApproval, Signal::Approval(ApprovalOutcome::Rejected)).unwrap(),
            Node::Mishandled
        );
        assert_eq!(
            next_node(Node::WaitApproval, Signal::Approval(ApprovalOutcome::Abandoned)).unwrap(),
            Node::Mishandled
        );
    }

    #[test]
    fn test_connection_and_mishandling_edges() {
        assert_eq!(
            next_node(Node::InFlight, Signal::PendingConnection(true)).unwrap(),
            Node::Transfer
        );
        assert_eq!(
            next_node(Node::Transfer, Signal::ConnectionMade).unwrap(),
            Node::Sorting
        );
        assert_eq!(
            next_node(Node::Arrival, Signal::Located(false)).unwrap(),
            Node::Mishandled
        );
        assert_eq!(
            next_node(Node::Mishandled, Signal::Done).unwrap(),
            Node::RootCauseAnalysis
        );
        assert_eq!(
            next_node(Node::Compensation, Signal::RequiresApproval(true)).unwrap(),
            Node::RequestApproval
        );
    }

    #[test]
    fn test_terminal_has_no_edges() {
        assert!(next_node(Node::Delivered, Signal::Done).is_err());
        assert!(next_node(Node::Sorting, Signal::Done).is_err());
    }
}
