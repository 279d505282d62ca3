/*!
 * Workload profile to worker-count mapping
 */

use crate::config::WorkloadProfile;

/// Maximum workers a pool may spawn under the given profile
///
/// Each pool additionally caps the count by the number of items it has to
/// process, so no pool spawns more workers than work items.
pub fn max_workers(profile: WorkloadProfile) -> usize {
    let cpu_cores = num_cpus::get();

    let workers = match profile {
        WorkloadProfile::VeryLow => 1,
        WorkloadProfile::Low => cpu_cores / 4,
        WorkloadProfile::Normal => cpu_cores / 2,
        WorkloadProfile::High => cpu_cores * 3 / 4,
        WorkloadProfile::Insane => cpu_cores,
    };

    workers.max(1)
}

/// Worker count for a pool with `items` pending entries
pub fn pool_workers(profile: WorkloadProfile, items: usize) -> usize {
    max_workers(profile).min(items)
}

// Shim for num_cpus functionality (fallback to std if needed)
//
// If CPU detection fails (restricted containers, exotic cgroup setups), we
// default to a single worker and warn on stderr, since logging may not be
// initialized yet when this first runs.
mod num_cpus {
    use std::thread;

    pub fn get() -> usize {
        thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or_else(|e| {
                eprintln!(
                    "WARN: Umbra failed to detect available parallelism: {}. \
                    Defaulting to 1 worker per pool.",
                    e
                );
                1
            })
    }
}
