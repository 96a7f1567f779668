//! Browser automation over the Chrome DevTools Protocol
//!
//! Just enough of a CDP stack to script one page of a real Chrome:
//! launch or attach, navigate, wait on conditions, click and type, and
//! observe network traffic from watchdogs.
//!
//! # Layers
//!
//! 1. **cdp**: one WebSocket, request/response matching, event routing
//! 2. **session**: browser lifecycle, pages, watchdogs
//! 3. **page**: the [`PageDriver`] operations flows are written against

pub mod cdp;
pub mod error;
pub mod events;
pub mod launcher;
pub mod page;
pub mod session;
pub mod watchdog;

pub use cdp::{CDPClient, CDPSession, EventRouter};
pub use error::{BrowserError, Result};
pub use events::{BrowserEvent, EventBus};
pub use launcher::{LaunchOptions, Viewport};
pub use page::{Nth, Page, PageDriver, PageOptions, UrlCondition};
pub use session::{BrowserSession, SessionConfig};
pub use watchdog::{Watchdog, WatchdogManager};
