//! Run-time parameter surface, consumed from whatever parameter
//! collaborator the embedding application provides. Field names mirror
//! the `cascade.*` parameter keys components and tooling already use;
//! kept as plain struct fields here rather than a generic string-keyed
//! parameter system, since the core never needs to look one up by name.

#[derive(Debug, Clone)]
pub struct RuntimeParameters {
    /// `cascade.NumThreads`. `-1` (default) means auto-size to
    /// `num_processors - 1`.
    pub num_threads: i32,
    /// `cascade.ClockRounding`, in ps. Edge-coalescing tolerance.
    pub clock_rounding: u64,
    /// `cascade.DefaultClockPeriod`, in ps.
    pub default_clock_period: u64,
    /// `cascade.Timeout`, in ns. `0` disables the timeout.
    pub timeout: u64,
    /// `cascade.Finish`, in ns. `0` disables the early finish.
    pub finish: u64,
    /// `cascade.CheckpointInterval`, in ns. `0` disables checkpointing.
    pub checkpoint_interval: u64,
    pub checkpoint_name: String,
    pub safe_checkpoint: bool,
    /// `cascade.TraceStartTime` / `cascade.TraceStopTime`, in ns.
    pub trace_start_time: u64,
    pub trace_stop_time: u64,
}

impl Default for RuntimeParameters {
    fn default() -> Self {
        Self {
            num_threads: -1,
            clock_rounding: 1,
            default_clock_period: 1000,
            timeout: 0,
            finish: 0,
            checkpoint_interval: 0,
            checkpoint_name: "cascade.checkpoint".to_string(),
            safe_checkpoint: false,
            trace_start_time: 0,
            trace_stop_time: 0,
        }
    }
}

impl RuntimeParameters {
    pub fn checkpointing_enabled(&self) -> bool {
        self.checkpoint_interval > 0
    }
}
