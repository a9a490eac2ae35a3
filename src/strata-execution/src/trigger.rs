use strata_table::{Duration, Time};

/// Decides when a cached key's rows are emitted downstream.
///
/// Whatever the trigger, every key still cached when its dataset finishes without error
/// is emitted before the finish is forwarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerSpec {
    /// Fires once the watermark passes the key's stop time plus the allowed lateness.
    AfterWatermark { allowed_lateness: Duration },
    /// Fires once processing time is `duration` past the first row cached for the key.
    AfterProcessingTime { duration: Duration },
    /// Fires once the key holds at least `count` rows.
    AfterAtLeastCount { count: usize },
}

impl Default for TriggerSpec {
    fn default() -> Self {
        Self::AfterWatermark {
            allowed_lateness: Duration::ZERO,
        }
    }
}

/// What a trigger may look at for one cached key.
#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct TriggerContext {
    pub watermark: Option<Time>,
    pub processing_time: Option<Time>,
    /// `_stop` of the key, falling back to the stop of the dataset's bounds.
    pub stop: Option<Time>,
    pub first_seen: Option<Time>,
    pub rows: usize,
}

impl TriggerSpec {
    pub(crate) fn fires(&self, ctx: &TriggerContext) -> bool {
        match *self {
            Self::AfterWatermark { allowed_lateness } => match (ctx.watermark, ctx.stop) {
                (Some(mark), Some(stop)) => mark >= stop.add(allowed_lateness),
                _ => false,
            },
            Self::AfterProcessingTime { duration } => match (ctx.processing_time, ctx.first_seen) {
                (Some(now), Some(first)) => now >= first.add(duration),
                _ => false,
            },
            Self::AfterAtLeastCount { count } => ctx.rows >= count.max(1),
        }
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    #[case(None, Some(10), 0, false)]
    #[case(Some(9), Some(10), 0, false)]
    #[case(Some(10), Some(10), 0, true)]
    #[case(Some(12), Some(10), 5, false)]
    #[case(Some(15), Some(10), 5, true)]
    #[case(Some(100), None, 0, false)]
    fn after_watermark(
        #[case] watermark: Option<i64>,
        #[case] stop: Option<i64>,
        #[case] lateness: i64,
        #[case] expected: bool,
    ) {
        let trigger = TriggerSpec::AfterWatermark {
            allowed_lateness: Duration(lateness),
        };
        let ctx = TriggerContext {
            watermark: watermark.map(Time),
            stop: stop.map(Time),
            ..Default::default()
        };
        assert_eq!(trigger.fires(&ctx), expected);
    }

    #[test]
    fn after_processing_time_waits_from_first_row() {
        let trigger = TriggerSpec::AfterProcessingTime {
            duration: Duration(10),
        };
        let mut ctx = TriggerContext {
            processing_time: Some(Time(15)),
            first_seen: Some(Time(10)),
            ..Default::default()
        };
        assert!(!trigger.fires(&ctx));
        ctx.processing_time = Some(Time(20));
        assert!(trigger.fires(&ctx));
        ctx.first_seen = None;
        assert!(!trigger.fires(&ctx));
    }

    #[test]
    fn after_count() {
        let trigger = TriggerSpec::AfterAtLeastCount { count: 3 };
        let mut ctx = TriggerContext {
            rows: 2,
            ..Default::default()
        };
        assert!(!trigger.fires(&ctx));
        ctx.rows = 3;
        assert!(trigger.fires(&ctx));
    }
}
