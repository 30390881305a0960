pub mod frame;
pub mod parser;
pub mod stream;
pub mod writer;

pub use frame::Frame;
pub use stream::FrameReader;
pub use writer::Writer;
