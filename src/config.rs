/// Construction-time settings for [`SimpleCache`](crate::SimpleCache).
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// Memory budget in bytes that `delete_objects_to_get_down_to_size`
    /// evicts down to. Loads are never refused for exceeding it.
    pub max_memory_usage: u64,
}

impl Config {
    pub fn with_max_memory_usage(max_memory_usage: u64) -> Self {
        Self { max_memory_usage }
    }
}

impl Default for Config {
    /// Unbounded.
    fn default() -> Self {
        Self {
            max_memory_usage: u64::MAX,
        }
    }
}
