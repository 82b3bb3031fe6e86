use explorer_realtime_types::UpdateKind;
use metrics::{Counter, counter, describe_counter};
use std::sync::LazyLock;

const FRAMES_RECEIVED: &str = "explorer.realtime.frames_received";
const FRAMES_RECEIVED_HELP: &str = "Number of text frames received from the upstream node";

const FRAMES_DROPPED: &str = "explorer.realtime.frames_dropped";
const FRAMES_DROPPED_HELP: &str = "Number of frames dropped as malformed, stale or unrecognized";

const RECONNECTS: &str = "explorer.realtime.reconnects";
const RECONNECTS_HELP: &str = "Number of times the upstream connection was lost";

const UPDATES_DELIVERED: &str = "explorer.realtime.updates_delivered";
const UPDATES_DELIVERED_HELP: &str = "Number of updates delivered to subscriber handlers";

const SUBSCRIBER_FAILURES: &str = "explorer.realtime.subscriber_failures";
const SUBSCRIBER_FAILURES_HELP: &str = "Number of subscriber handler errors and panics";

const REFRESHES: &str = "explorer.realtime.refreshes";
const REFRESHES_HELP: &str = "Number of one-shot refresh requests sent upstream";

static DESCRIBE: LazyLock<()> = LazyLock::new(|| {
    describe_counter!(FRAMES_RECEIVED, FRAMES_RECEIVED_HELP);
    describe_counter!(FRAMES_DROPPED, FRAMES_DROPPED_HELP);
    describe_counter!(RECONNECTS, RECONNECTS_HELP);
    describe_counter!(UPDATES_DELIVERED, UPDATES_DELIVERED_HELP);
    describe_counter!(SUBSCRIBER_FAILURES, SUBSCRIBER_FAILURES_HELP);
    describe_counter!(REFRESHES, REFRESHES_HELP);
});

fn frames_received() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(FRAMES_RECEIVED)
}

pub(crate) fn inc_frames_received() {
    frames_received().increment(1);
}

fn frames_dropped(reason: &'static str) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(FRAMES_DROPPED, "reason" => reason)
}

pub(crate) fn inc_frames_dropped(reason: &'static str) {
    frames_dropped(reason).increment(1);
}

fn reconnects() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(RECONNECTS)
}

pub(crate) fn inc_reconnects() {
    reconnects().increment(1);
}

fn updates_delivered(kind: UpdateKind) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(UPDATES_DELIVERED, "kind" => kind.to_string())
}

pub(crate) fn inc_updates_delivered(kind: UpdateKind) {
    updates_delivered(kind).increment(1);
}

fn subscriber_failures() -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(SUBSCRIBER_FAILURES)
}

pub(crate) fn inc_subscriber_failures() {
    subscriber_failures().increment(1);
}

fn refreshes(kind: UpdateKind) -> Counter {
    LazyLock::force(&DESCRIBE);
    counter!(REFRESHES, "kind" => kind.to_string())
}

pub(crate) fn inc_refreshes(kind: UpdateKind) {
    refreshes(kind).increment(1);
}
