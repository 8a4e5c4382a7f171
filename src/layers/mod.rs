pub mod param;
pub mod conv;
pub mod pool;
pub mod up;
pub mod block;

pub use param::Param;
pub use conv::Conv2d;
pub use pool::MaxPool2d;
pub use up::ConvTranspose2d;
pub use block::DoubleConv;
