//! Default values for the launch contract and on-disk layout.

use std::time::Duration;

/// Application identifier of the protected root application.
pub const ROOT_APP: &str = "spawner";

/// Bind host used when none is given.
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Version reported when an application declares none.
pub const DEFAULT_VERSION: &str = "undefined";

/// Capacity of the request queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Deadline a caller waits for its request to complete, in milliseconds.
pub const DEFAULT_REQUEST_DEADLINE_MS: u64 = 5_000;

/// Deadline a caller waits for its request to complete.
pub const DEFAULT_REQUEST_DEADLINE: Duration = Duration::from_millis(DEFAULT_REQUEST_DEADLINE_MS);

/// Directory holding installed application artifacts.
pub const APPS_DIR: &str = "apps";

/// Directory holding per-service log files.
pub const LOGS_DIR: &str = "logs";

/// Directory holding per-service lock, pid and health files.
pub const RUN_DIR: &str = "run";

/// Environment variable naming the privilege elevation wrapper for children.
///
/// The value is split on whitespace, so `sudo -n` is accepted.
pub const LAUNCH_WRAPPER_ENV: &str = "ARBOR_LAUNCH_WRAPPER";

/// Environment variable overriding the working directory of a service tree.
pub const WORK_DIR_ENV: &str = "ARBOR_WORK_DIR";

/// Exclusive lower bound for child ports.
pub const MIN_CHILD_PORT: u16 = 1000;

/// Exclusive upper bound for child ports.
pub const MAX_CHILD_PORT: u16 = 65535;
