//! Send gating: kill switch, quiet hours, throttling and retry timing.

pub mod gate;
pub mod kill_switch;
pub mod opt_out;
pub mod quiet_hours;
pub mod retry;
pub mod throttle;

pub use gate::{DeliveryGate, Gate};
pub use kill_switch::{BlockReason, KillSwitch};
pub use opt_out::is_opt_out_message;
pub use quiet_hours::QuietHours;
pub use retry::RetryPolicy;
pub use throttle::MessageThrottler;
