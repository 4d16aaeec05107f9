/// Counter for algorithm change signals handed to the mechanism
pub const SIGNALS_RECEIVED_COUNTER: &str = "switch_signals_received_total";

/// Counter for signals that were dropped (with reason label: busy/unknown_algorithm/malformed)
pub const SIGNALS_REJECTED_COUNTER: &str = "switch_signals_rejected_total";

/// Counter for transitions entered
pub const TRANSITIONS_STARTED_COUNTER: &str = "switch_transitions_started_total";

/// Counter for transitions that reached cutover
pub const TRANSITIONS_COMPLETED_COUNTER: &str = "switch_transitions_completed_total";

/// Histogram for the time from transition entry to cutover
pub const TRANSITION_DURATION_HISTOGRAM: &str = "switch_transition_duration_seconds";

/// Counter for fields that could not be carried into the incoming algorithm
pub const STATE_TRANSFER_FAILURES_COUNTER: &str = "switch_state_transfer_failures_total";

/// Counter for items processed by tracks (with algorithm label)
pub const ITEMS_PROCESSED_COUNTER: &str = "switch_items_processed_total";
