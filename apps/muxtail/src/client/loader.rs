//! Output window loader: reconciles push-delivered live snapshots with
//! pull-based history pages while preserving the user's reading position.
//!
//! The loader is a pure state machine. It decides *when* a history fetch
//! should start and *what* the view should do afterwards; the coordinator
//! performs the actual fetch and applies the returned [`ViewCommand`]s.

use crate::protocol::OutputSnapshot;
use crate::session::Target;

/// Pixels from the top that trigger a history load.
pub const TOP_THRESHOLD: f64 = 50.0;

/// Pixels from the bottom within which the view counts as "at bottom".
pub const BOTTOM_THRESHOLD: f64 = 50.0;

/// A scroll-height jump larger than this is content growth, not user intent.
pub const CONTENT_CHANGE_THRESHOLD: f64 = 100.0;

/// Lines added per history load.
pub const HISTORY_PAGE_LINES: u32 = 500;

/// Scroll telemetry from the view, in pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScrollMetrics {
    pub scroll_top: f64,
    pub scroll_height: f64,
    pub client_height: f64,
}

impl ScrollMetrics {
    pub fn distance_from_bottom(&self) -> f64 {
        self.scroll_height - self.scroll_top - self.client_height
    }
}

/// Instructions for the view after a buffer change.
#[derive(Debug, Clone, PartialEq)]
pub enum ViewCommand {
    /// Move the viewport to the newest content.
    ScrollToBottom,
    /// After a history load re-rendered, set `scroll_top` so the previously
    /// visible top line stays anchored: `new_height - previous_height`.
    RestoreScrollOffset { previous_height: f64 },
}

/// Scroll offset that keeps the pre-load viewport anchored after the view
/// re-rendered at `new_height`.
pub fn anchored_scroll_top(new_height: f64, previous_height: f64) -> f64 {
    (new_height - previous_height).max(0.0)
}

/// A history fetch the coordinator should issue. Carries the target it was
/// computed for so completions that straddle a target switch can be
/// discarded.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryRequest {
    pub target: Target,
    pub lines: u32,
}

/// What happened to a pushed snapshot.
#[derive(Debug, Clone, PartialEq)]
pub enum SnapshotOutcome {
    Applied(Option<ViewCommand>),
    /// A history load is in flight; applying the snapshot would discard the
    /// expanded history the user is viewing, so it is dropped outright.
    DroppedWhileLoading,
    /// Snapshot for a target this loader no longer shows.
    IgnoredOtherTarget,
}

pub struct OutputWindowLoader {
    target: Target,
    content: String,
    total_loaded_lines: u32,
    loading_history: bool,
    user_scrolled_up: bool,
    last_scroll_top: f64,
    last_known_scroll_height: f64,
    previous_scroll_height: f64,
    /// Swallows the first scroll event after a target switch so the DOM's
    /// post-switch scroll reset is not misread as a user upward scroll.
    settle_after_retarget: bool,
}

impl OutputWindowLoader {
    pub fn new(target: Target) -> Self {
        Self {
            target,
            content: String::new(),
            total_loaded_lines: 0,
            loading_history: false,
            user_scrolled_up: false,
            last_scroll_top: 0.0,
            last_known_scroll_height: 0.0,
            previous_scroll_height: 0.0,
            settle_after_retarget: false,
        }
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn total_loaded_lines(&self) -> u32 {
        self.total_loaded_lines
    }

    pub fn is_loading_history(&self) -> bool {
        self.loading_history
    }

    pub fn has_user_scrolled_up(&self) -> bool {
        self.user_scrolled_up
    }

    /// Wholesale-replaces the buffer with a fresh (non-history) snapshot.
    /// Returns the tail-follow command when the user is still at the bottom.
    pub fn set_output(&mut self, content: String) -> Option<ViewCommand> {
        self.content = content;
        self.total_loaded_lines = 0;
        (!self.user_scrolled_up).then_some(ViewCommand::ScrollToBottom)
    }

    /// Routes a live push snapshot into the buffer, subject to the in-flight
    /// history guard.
    pub fn apply_snapshot(&mut self, snapshot: &OutputSnapshot) -> SnapshotOutcome {
        if snapshot.target != self.target {
            return SnapshotOutcome::IgnoredOtherTarget;
        }
        if self.loading_history {
            return SnapshotOutcome::DroppedWhileLoading;
        }
        SnapshotOutcome::Applied(self.set_output(snapshot.content.clone()))
    }

    /// Consumes one scroll event. Updates tail-follow intent, distinguishes
    /// user scrolls from content-growth artifacts, and returns a fetch
    /// request when backward history should be expanded.
    pub fn on_scroll(&mut self, metrics: ScrollMetrics) -> Option<HistoryRequest> {
        let at_bottom = metrics.distance_from_bottom() < BOTTOM_THRESHOLD;
        self.user_scrolled_up = !at_bottom;

        let content_driven = (metrics.scroll_height - self.last_known_scroll_height).abs()
            > CONTENT_CHANGE_THRESHOLD;
        let scrolled_up = metrics.scroll_top < self.last_scroll_top;

        self.last_scroll_top = metrics.scroll_top;
        self.last_known_scroll_height = metrics.scroll_height;

        if self.settle_after_retarget {
            self.settle_after_retarget = false;
            return None;
        }
        if content_driven {
            return None;
        }
        if !scrolled_up || metrics.scroll_top >= TOP_THRESHOLD || self.loading_history {
            return None;
        }

        self.loading_history = true;
        self.previous_scroll_height = metrics.scroll_height;
        Some(HistoryRequest {
            target: self.target.clone(),
            lines: self.total_loaded_lines + HISTORY_PAGE_LINES,
        })
    }

    /// Completes a history fetch. The loading flag clears in all outcomes;
    /// a failed fetch leaves the buffer unchanged and the next qualifying
    /// scroll retries. Completions for a stale target are discarded whole.
    pub fn complete_history(
        &mut self,
        request: &HistoryRequest,
        content: Option<String>,
    ) -> Option<ViewCommand> {
        if request.target != self.target {
            return None;
        }
        self.loading_history = false;
        let content = content?;
        self.content = content;
        self.total_loaded_lines = request.lines;
        Some(ViewCommand::RestoreScrollOffset {
            previous_height: self.previous_scroll_height,
        })
    }

    /// Forced: always jumps and re-arms tail-follow. Unforced: a no-op while
    /// the user has scrolled away from the bottom.
    pub fn scroll_to_bottom(&mut self, force: bool) -> Option<ViewCommand> {
        if force {
            self.user_scrolled_up = false;
            return Some(ViewCommand::ScrollToBottom);
        }
        (!self.user_scrolled_up).then_some(ViewCommand::ScrollToBottom)
    }

    /// Clears the buffer for a new target and arms the settle guard. The
    /// scroll baselines are kept: they describe the view element, which
    /// persists across the switch until it re-renders.
    pub fn reset_for_target(&mut self, target: Target) {
        self.target = target;
        self.content.clear();
        self.total_loaded_lines = 0;
        self.loading_history = false;
        self.user_scrolled_up = false;
        self.previous_scroll_height = 0.0;
        self.settle_after_retarget = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loader() -> OutputWindowLoader {
        OutputWindowLoader::new(Target::default())
    }

    fn snapshot(target: &str, content: &str) -> OutputSnapshot {
        OutputSnapshot {
            target: Target::new(target),
            content: content.to_string(),
            timestamp: "2025-01-01T00:00:00".to_string(),
        }
    }

    /// Establishes a stable baseline: one event whose height change is
    /// content-driven (absorbed), leaving known scroll position/height.
    fn settle(loader: &mut OutputWindowLoader, scroll_top: f64, scroll_height: f64) {
        let req = loader.on_scroll(ScrollMetrics {
            scroll_top,
            scroll_height,
            client_height: 500.0,
        });
        assert_eq!(req, None);
    }

    #[test]
    fn fresh_snapshot_replaces_and_follows_tail() {
        let mut l = loader();
        let outcome = l.apply_snapshot(&snapshot("default", "A\nB"));
        assert_eq!(
            outcome,
            SnapshotOutcome::Applied(Some(ViewCommand::ScrollToBottom))
        );
        assert_eq!(l.content(), "A\nB");
        assert_eq!(l.total_loaded_lines(), 0);
    }

    #[test]
    fn snapshot_for_other_target_is_ignored() {
        let mut l = loader();
        assert_eq!(
            l.apply_snapshot(&snapshot("other", "X")),
            SnapshotOutcome::IgnoredOtherTarget
        );
        assert_eq!(l.content(), "");
    }

    #[test]
    fn upward_scroll_near_top_triggers_history_load() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);

        let req = l.on_scroll(ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert_eq!(
            req,
            Some(HistoryRequest {
                target: Target::default(),
                lines: HISTORY_PAGE_LINES,
            })
        );
        assert!(l.is_loading_history());
    }

    #[test]
    fn downward_scroll_near_top_does_not_trigger() {
        let mut l = loader();
        settle(&mut l, 5.0, 1000.0);

        // scroll_top increased: moving away from the top
        let req = l.on_scroll(ScrollMetrics {
            scroll_top: 30.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert_eq!(req, None);
    }

    #[test]
    fn content_growth_never_triggers_history() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);

        // Height jumped by 400px: content-driven, even though the position
        // qualifies in every other way.
        let req = l.on_scroll(ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 1400.0,
            client_height: 500.0,
        });
        assert_eq!(req, None);
        assert!(!l.is_loading_history());
    }

    #[test]
    fn single_fetch_while_loading() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);

        let first = l.on_scroll(ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert!(first.is_some());

        // Second qualifying event while the load is in flight is dropped,
        // not deferred.
        let second = l.on_scroll(ScrollMetrics {
            scroll_top: 5.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert_eq!(second, None);
    }

    #[test]
    fn history_success_anchors_scroll_position() {
        let mut l = loader();
        l.set_output("A\nB".to_string());
        settle(&mut l, 400.0, 1000.0);

        let req = l
            .on_scroll(ScrollMetrics {
                scroll_top: 10.0,
                scroll_height: 1000.0,
                client_height: 500.0,
            })
            .unwrap();

        let cmd = l.complete_history(&req, Some("history\nA\nB".to_string()));
        assert_eq!(
            cmd,
            Some(ViewCommand::RestoreScrollOffset {
                previous_height: 1000.0
            })
        );
        assert_eq!(l.content(), "history\nA\nB");
        assert_eq!(l.total_loaded_lines(), HISTORY_PAGE_LINES);
        assert!(!l.is_loading_history());

        // The view applies the offset against its new height.
        assert_eq!(anchored_scroll_top(1600.0, 1000.0), 600.0);
    }

    #[test]
    fn history_pages_grow_monotonically() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);

        let first = l
            .on_scroll(ScrollMetrics {
                scroll_top: 10.0,
                scroll_height: 1000.0,
                client_height: 500.0,
            })
            .unwrap();
        assert_eq!(first.lines, 500);
        l.complete_history(&first, Some("page1".to_string()));

        settle(&mut l, 400.0, 1000.0);
        let second = l
            .on_scroll(ScrollMetrics {
                scroll_top: 10.0,
                scroll_height: 1000.0,
                client_height: 500.0,
            })
            .unwrap();
        assert_eq!(second.lines, 1000);
    }

    #[test]
    fn history_failure_leaves_buffer_and_clears_flag() {
        let mut l = loader();
        l.set_output("A\nB".to_string());
        settle(&mut l, 400.0, 1000.0);

        let req = l
            .on_scroll(ScrollMetrics {
                scroll_top: 10.0,
                scroll_height: 1000.0,
                client_height: 500.0,
            })
            .unwrap();
        assert_eq!(l.complete_history(&req, None), None);
        assert_eq!(l.content(), "A\nB");
        assert_eq!(l.total_loaded_lines(), 0);
        assert!(!l.is_loading_history());

        // Retriable on the next qualifying scroll.
        let retry = l.on_scroll(ScrollMetrics {
            scroll_top: 5.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert!(retry.is_some());
    }

    #[test]
    fn snapshot_dropped_while_loading() {
        let mut l = loader();
        l.set_output("A\nB".to_string());
        settle(&mut l, 400.0, 1000.0);
        l.on_scroll(ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        })
        .unwrap();

        assert_eq!(
            l.apply_snapshot(&snapshot("default", "A\nB\nC")),
            SnapshotOutcome::DroppedWhileLoading
        );
        assert_eq!(l.content(), "A\nB");
    }

    #[test]
    fn stale_target_completion_is_discarded() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);
        let req = l
            .on_scroll(ScrollMetrics {
                scroll_top: 10.0,
                scroll_height: 1000.0,
                client_height: 500.0,
            })
            .unwrap();

        l.reset_for_target(Target::new("other"));
        assert_eq!(l.complete_history(&req, Some("old target".to_string())), None);
        assert_eq!(l.content(), "");
        assert_eq!(l.total_loaded_lines(), 0);
    }

    #[test]
    fn retarget_settles_one_scroll_event() {
        let mut l = loader();
        settle(&mut l, 400.0, 1000.0);
        l.reset_for_target(Target::new("other"));

        // The DOM's post-switch scroll reset looks exactly like a user
        // upward scroll to the top. The settle guard swallows it.
        let reset_event = l.on_scroll(ScrollMetrics {
            scroll_top: 0.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert_eq!(reset_event, None);
        assert!(!l.is_loading_history());

        // The guard is one-shot: a later genuine upward scroll triggers.
        settle(&mut l, 300.0, 1000.0);
        let genuine = l.on_scroll(ScrollMetrics {
            scroll_top: 10.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert_eq!(
            genuine,
            Some(HistoryRequest {
                target: Target::new("other"),
                lines: HISTORY_PAGE_LINES,
            })
        );
    }

    #[test]
    fn tail_follow_suspends_and_resumes() {
        let mut l = loader();
        // Away from the bottom: distance 450px
        l.on_scroll(ScrollMetrics {
            scroll_top: 50.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert!(l.has_user_scrolled_up());
        assert_eq!(l.set_output("new".to_string()), None);
        assert_eq!(l.scroll_to_bottom(false), None);

        // Back within 50px of the bottom: tail-follow resumes
        l.on_scroll(ScrollMetrics {
            scroll_top: 480.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert!(!l.has_user_scrolled_up());
        assert_eq!(
            l.set_output("newer".to_string()),
            Some(ViewCommand::ScrollToBottom)
        );
    }

    #[test]
    fn forced_scroll_to_bottom_rearms_tail_follow() {
        let mut l = loader();
        l.on_scroll(ScrollMetrics {
            scroll_top: 50.0,
            scroll_height: 1000.0,
            client_height: 500.0,
        });
        assert!(l.has_user_scrolled_up());

        assert_eq!(l.scroll_to_bottom(true), Some(ViewCommand::ScrollToBottom));
        assert!(!l.has_user_scrolled_up());
    }
}
