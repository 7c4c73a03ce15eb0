mod bar;
mod corporate_action;
mod quote;
mod session;
mod timeframe;

pub use bar::{Bar, Tick};
pub use corporate_action::{sort_actions, ActionKind, CorporateAction};
pub use quote::{FetchResult, FetchTask, Quote};
pub use session::{SessionBounds, SessionClock, SessionWindow};
pub use timeframe::Timeframe;
