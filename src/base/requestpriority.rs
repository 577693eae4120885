//! Request priority (matches Chromium's net/base/request_priority.h).

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize)]
pub enum RequestPriority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    #[default]
    Medium = 4,
    Highest = 5,
}

impl RequestPriority {
    /// All priorities, most urgent first.
    pub const ALL: [RequestPriority; 6] = [
        RequestPriority::Highest,
        RequestPriority::Medium,
        RequestPriority::Low,
        RequestPriority::Lowest,
        RequestPriority::Idle,
        RequestPriority::Throttled,
    ];

    /// Number of distinct priorities.
    pub const COUNT: usize = 6;

    /// SPDY/3 priority (0 is most urgent).
    /// Mirrors `ConvertRequestPriorityToSpdyPriority`.
    pub fn to_spdy_priority(self) -> u8 {
        match self {
            RequestPriority::Highest => 0,
            RequestPriority::Medium => 1,
            RequestPriority::Low => 2,
            RequestPriority::Lowest => 3,
            RequestPriority::Idle => 4,
            RequestPriority::Throttled => 5,
        }
    }

    /// HTTP/2 weight in [1, 256] derived from the SPDY/3 priority.
    pub fn to_http2_weight(self) -> u16 {
        let steps = 255.9f32 / 7.0;
        (steps * (7.0 - self.to_spdy_priority() as f32)) as u16 + 1
    }

    /// Lane index for per-priority queues: 0 is the most urgent lane.
    pub fn lane(self) -> usize {
        self.to_spdy_priority() as usize
    }
}
