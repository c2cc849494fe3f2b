pub mod approval;
pub mod bag;
pub mod checkpoint;

pub use approval::*;
pub use bag::*;
pub use checkpoint::*;
