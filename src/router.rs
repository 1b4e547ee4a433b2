//! Message routing.
//!
//! Pure classification over a context snapshot; the pipeline gathers the
//! inputs (active deal, trigger match, pause state) before calling in.
//! Precedence: control group, then ignored sender / empty text, then
//! active-deal continuation, then trigger match, otherwise observe. While
//! the bot is paused a trigger match downgrades to observe.

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Route {
    Control,
    Triggered,
    Deal,
    Observe,
    Ignore,
}

impl Route {
    pub fn as_str(&self) -> &'static str {
        match self {
            Route::Control => "CONTROL",
            Route::Triggered => "TRIGGERED",
            Route::Deal => "DEAL",
            Route::Observe => "OBSERVE",
            Route::Ignore => "IGNORE",
        }
    }
}

#[derive(Debug, Clone)]
pub struct RouteContext {
    pub is_control_group: bool,
    pub sender_ignored: bool,
    pub text_empty: bool,
    pub has_active_deal: bool,
    pub trigger_matched: bool,
    pub paused: bool,
}

pub fn route(ctx: &RouteContext) -> Route {
    if ctx.is_control_group {
        return Route::Control;
    }
    if ctx.sender_ignored || ctx.text_empty {
        return Route::Ignore;
    }
    if ctx.has_active_deal {
        return Route::Deal;
    }
    if ctx.trigger_matched {
        if ctx.paused {
            return Route::Observe;
        }
        return Route::Triggered;
    }
    Route::Observe
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> RouteContext {
        RouteContext {
            is_control_group: false,
            sender_ignored: false,
            text_empty: false,
            has_active_deal: false,
            trigger_matched: false,
            paused: false,
        }
    }

    #[test]
    fn control_group_wins_over_everything() {
        let context = RouteContext {
            is_control_group: true,
            sender_ignored: true,
            has_active_deal: true,
            trigger_matched: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Control);
    }

    #[test]
    fn ignored_sender_beats_deal_and_trigger() {
        let context = RouteContext {
            sender_ignored: true,
            has_active_deal: true,
            trigger_matched: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Ignore);
    }

    #[test]
    fn empty_text_ignored() {
        let context = RouteContext {
            text_empty: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Ignore);
    }

    #[test]
    fn active_deal_beats_trigger_match() {
        let context = RouteContext {
            has_active_deal: true,
            trigger_matched: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Deal);
    }

    #[test]
    fn trigger_match_routes_triggered() {
        let context = RouteContext {
            trigger_matched: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Triggered);
    }

    #[test]
    fn paused_downgrades_triggered_to_observe() {
        let context = RouteContext {
            trigger_matched: true,
            paused: true,
            ..ctx()
        };
        assert_eq!(route(&context), Route::Observe);
    }

    #[test]
    fn default_is_observe() {
        assert_eq!(route(&ctx()), Route::Observe);
    }
}
