pub mod date;
pub mod logging;

pub use date::{day_key, start_of_local_day, Clock, ManualClock, SystemClock};
pub use logging::init_logging;
