//! The queue driver and its collaborators: partition resolution,
//! reservation handles and the background sweeper.

pub mod driver;
pub mod reservation;
pub mod resolver;
pub mod sweeper;

pub use driver::{PushOptions, PushReceipt, QueueDriver};
pub use reservation::{Reservation, ReservationParts};
pub use resolver::{DispatchableJob, PartitionResolver, detect_partition_field};
pub use sweeper::spawn_sweeper;
