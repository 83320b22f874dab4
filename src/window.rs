//! Date window planning for report streams.
//!
//! A window is the half-open day range `[start, end)`; `end` never exceeds
//! today. The first window re-reads the attribution lookback region when the
//! watermark falls inside it, because the API backfills recent days late.

use chrono::{Duration, NaiveDate};

/// Upper bound on the lookback and the window size, in days.
pub const MAX_SPAN_DAYS: i64 = 3_650;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Window {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl Window {
    /// Last day inside the window, which is what the API's inclusive
    /// `endDate` expects.
    pub fn last_day(&self) -> NaiveDate {
        self.end
            .checked_sub_signed(Duration::days(1))
            .map_or(self.start, |day| day.max(self.start))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct WindowPlanner {
    pub today: NaiveDate,
    pub attribution_days: i64,
    pub window_size_days: i64,
}

impl WindowPlanner {
    pub fn new(today: NaiveDate, attribution_days: i64, window_size_days: i64) -> Self {
        Self {
            today,
            attribution_days: attribution_days.clamp(0, MAX_SPAN_DAYS),
            window_size_days: window_size_days.clamp(1, MAX_SPAN_DAYS),
        }
    }

    /// First window for a key whose watermark (or start date) is `reports_time`.
    pub fn first(&self, reports_time: NaiveDate) -> Window {
        let start = if (self.today - reports_time).num_days() < self.attribution_days {
            self.today
                .checked_sub_signed(Duration::days(self.attribution_days))
                .unwrap_or(reports_time)
        } else {
            reports_time
        };
        self.clamped(start)
    }

    /// Window following `previous`.
    pub fn advance(&self, previous: &Window) -> Window {
        self.clamped(previous.end)
    }

    pub fn is_done(&self, window: &Window) -> bool {
        window.start >= self.today
    }

    /// All windows from the first one until `start` reaches today.
    pub fn windows(&self, reports_time: NaiveDate) -> impl Iterator<Item = Window> + '_ {
        std::iter::successors(Some(self.first(reports_time)), move |w| Some(self.advance(w)))
            .take_while(move |w| !self.is_done(w))
    }

    fn clamped(&self, start: NaiveDate) -> Window {
        let end = start
            .checked_add_signed(Duration::days(self.window_size_days))
            .map_or(self.today, |end| end.min(self.today));
        Window { start, end }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn old_watermark_starts_at_watermark() {
        let planner = WindowPlanner::new(d("2024-01-10"), 4, 30);
        let w = planner.first(d("2024-01-01"));
        assert_eq!(w.start, d("2024-01-01"));
        assert_eq!(w.end, d("2024-01-10"));
    }

    #[test]
    fn recent_watermark_is_pulled_back_to_attribution_floor() {
        let planner = WindowPlanner::new(d("2024-01-10"), 4, 30);
        let w = planner.first(d("2024-01-09"));
        assert_eq!(w.start, d("2024-01-06"));
        assert_eq!(w.end, d("2024-01-10"));
    }

    #[test]
    fn windows_cover_range_without_gaps() {
        let planner = WindowPlanner::new(d("2024-03-15"), 4, 30);
        let windows: Vec<_> = planner.windows(d("2024-01-01")).collect();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].start, d("2024-01-01"));
        assert_eq!(windows[0].end, d("2024-01-31"));
        assert_eq!(windows[1].start, d("2024-01-31"));
        assert_eq!(windows[2].end, d("2024-03-15"));
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        assert!(windows.iter().all(|w| w.end <= d("2024-03-15")));
    }

    #[test]
    fn advance_never_passes_today_and_terminates() {
        let today = d("2024-01-10");
        for size in 1..=40 {
            let planner = WindowPlanner::new(today, 0, size);
            let mut w = planner.first(d("2023-06-01"));
            let mut steps = 0;
            while !planner.is_done(&w) {
                assert!(w.end <= today);
                assert!(w.start < w.end);
                w = planner.advance(&w);
                steps += 1;
                assert!(steps < 1000);
            }
        }
    }

    #[test]
    fn zero_attribution_with_current_watermark_fetches_nothing() {
        let planner = WindowPlanner::new(d("2024-01-10"), 0, 30);
        assert_eq!(planner.windows(d("2024-01-10")).count(), 0);
    }

    #[test]
    fn oversized_spans_are_capped_without_overflow() {
        let today = d("2024-01-10");
        let planner = WindowPlanner::new(today, 1_000_000_000, 1_000_000_000);
        assert_eq!(planner.attribution_days, MAX_SPAN_DAYS);
        assert_eq!(planner.window_size_days, MAX_SPAN_DAYS);

        let windows: Vec<_> = planner.windows(d("2024-01-09")).collect();
        assert_eq!(windows.len(), 1);
        assert_eq!(windows[0].start, today - Duration::days(MAX_SPAN_DAYS));
        assert_eq!(windows[0].end, today);

        let near_max = WindowPlanner::new(NaiveDate::MAX, 0, MAX_SPAN_DAYS);
        let w = near_max.first(NaiveDate::MAX - Duration::days(1));
        assert_eq!(w.end, NaiveDate::MAX);
    }

    #[test]
    fn last_day_is_inclusive_end() {
        let w = Window {
            start: d("2024-01-06"),
            end: d("2024-01-10"),
        };
        assert_eq!(w.last_day(), d("2024-01-09"));
    }
}
