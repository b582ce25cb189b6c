//! Adapters: concrete implementations of the hexagonal port traits.
//!
//! | Adapter        | Implements        | Connects to                     |
//! |----------------|-------------------|---------------------------------|
//! | `sysfs_gpio`   | GpioBackend       | Linux `/sys/class/gpio`         |
//! | `sim`          | GpioBackend       | Synthetic DHT22 devices, relays |
//! | `memory_store` | StoragePort       | In-process tables               |
//! | `log_sink`     | NotificationSink  | `log` facade                    |
//! | `broadcast`    | NotificationSink  | Bounded queue for push clients  |
//! | `time`         | Clock             | System clock / manual clock     |

pub mod broadcast;
pub mod log_sink;
pub mod memory_store;
pub mod sim;
pub mod sysfs_gpio;
pub mod time;
