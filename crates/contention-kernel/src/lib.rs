//! Contention Kernel: fair, starvation-bounded arbitration of a ring of
//! shared slots among concurrent seats.
//!
//! Each seat needs both slots it shares with its neighbours to eat. A
//! fairness controller decides which idle seats may start contending, an
//! acquisition protocol decides who gets the slots, and a starvation timeout
//! bounds every wait. A second, deliberately unsafe protocol reproduces the
//! classic hold-and-wait deadlock so it can be observed and tested.

pub mod config;
pub mod driver;
pub mod events;
pub mod fairness;
pub mod invariants;
pub mod lifecycle;
pub mod protocol;
pub mod seat;
pub mod slot;
pub mod snapshot;
pub mod table;
pub mod watchdog;

pub use config::{AcquisitionStrategy, DelayRange, KernelConfig, SeedSeat};
pub use driver::{FinalReport, SeatReport, Simulation, SimulationHandle};
pub use events::{EventTotals, SimEvent};
pub use fairness::{FairnessController, PromotionPlan, plan_promotions};
pub use invariants::InvariantViolation;
pub use lifecycle::{SeatAction, SeatLifecycle};
pub use protocol::{Acquisition, Attempt};
pub use seat::{SeatId, SeatState};
pub use slot::{SlotId, SlotSnapshot};
pub use snapshot::{SeatSnapshot, TableSnapshot};
pub use table::Table;
pub use watchdog::{LivenessWatchdog, Stall};
