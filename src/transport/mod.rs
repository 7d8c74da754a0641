pub(crate) mod factory;
pub(crate) mod local;
pub(crate) mod remote;
pub(crate) mod session;

pub use factory::{ProcessSessionFactory, SessionFactory};
pub use local::LocalLaunch;
pub use session::{FrameError, FrameStream, MAX_FRAME_BYTES, TransportSession};
