pub use crate::api::SessionTemplate;
pub use crate::dispatch::{HookSet, Kernel, NoOpHooks, Task};
pub use crate::error::KernelError;
pub use crate::session::{NetState, Session};
pub use crate::timer::Timer;
