pub mod driver;
pub mod timers;

pub use driver::{
    until_next_midnight, ScheduleDriver, ScheduleError, ScheduleEvent, ScheduleHandle,
    HEARTBEAT_TIMER, MIDNIGHT_TIMER,
};
pub use timers::TimerSet;
