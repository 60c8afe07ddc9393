//! svckit server: routes, startup tasks and schedules booted onto an axum
//! application.

pub mod app;
pub mod boot;
pub mod context;
pub mod discovery;
pub mod http;
pub mod network;
pub mod responder;
pub mod route;
pub mod schedule;
pub mod startup;

pub use app::Application;
pub use boot::{BootError, BootReport, Bootstrap};
pub use context::ServiceContext;
pub use discovery::Discovery;
pub use self::http::{Request, Response};
pub use network::{HttpServer, NetworkConfig};
pub use responder::{inspect_detail, TerminalResponder};
pub use route::{Route, RouteError, RouteOptions, RouteTarget};
pub use schedule::{Schedule, ScheduleError, ScheduleState, Trigger};
pub use startup::{Completion, Startup, StartupError};
