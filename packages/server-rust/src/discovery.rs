//! Link-time discovery of routes, startup tasks and schedules.
//!
//! A definition unit is a constructor registered with one of the
//! [`define_route!`](crate::define_route), [`define_startup!`](crate::define_startup)
//! or [`define_schedule!`](crate::define_schedule) macros. Each unit records
//! the module it was defined in, so a module tree plays the role of a
//! directory tree:
//!
//! ```ignore
//! mod services {
//!     pub mod routes {
//!         pub mod cars {
//!             svckit_server::define_route!(|| {
//!                 let mut route = Route::get("/cars")?;
//!                 route.use_handler(ListCars);
//!                 Ok(route)
//!             });
//!         }
//!     }
//! }
//!
//! let discovery = Discovery::new(module_path!().to_string() + "::services");
//! ```

use std::fmt;

use anyhow::Context;

use crate::route::Route;
use crate::schedule::Schedule;
use crate::startup::Startup;

pub use inventory;

/// Constructor of one discovered instance.
#[derive(Clone, Copy)]
pub enum Definition {
    Route(fn() -> anyhow::Result<Route>),
    Startup(fn() -> anyhow::Result<Startup>),
    Schedule(fn() -> anyhow::Result<Schedule>),
}

/// A definition plus the module that registered it.
pub struct DefinitionUnit {
    module: &'static str,
    definition: Definition,
}

impl DefinitionUnit {
    #[must_use]
    pub const fn new(module: &'static str, definition: Definition) -> Self {
        Self { module, definition }
    }

    #[must_use]
    pub fn module(&self) -> &'static str {
        self.module
    }
}

impl fmt::Debug for DefinitionUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self.definition {
            Definition::Route(_) => "route",
            Definition::Startup(_) => "startup",
            Definition::Schedule(_) => "schedule",
        };
        f.debug_struct("DefinitionUnit")
            .field("module", &self.module)
            .field("kind", &kind)
            .finish()
    }
}

inventory::collect!(DefinitionUnit);

/// Registers a route constructor for the enclosing module.
#[macro_export]
macro_rules! define_route {
    ($ctor:expr) => {
        $crate::discovery::inventory::submit! {
            $crate::discovery::DefinitionUnit::new(
                module_path!(),
                $crate::discovery::Definition::Route($ctor),
            )
        }
    };
}

/// Registers a startup task constructor for the enclosing module.
#[macro_export]
macro_rules! define_startup {
    ($ctor:expr) => {
        $crate::discovery::inventory::submit! {
            $crate::discovery::DefinitionUnit::new(
                module_path!(),
                $crate::discovery::Definition::Startup($ctor),
            )
        }
    };
}

/// Registers a schedule constructor for the enclosing module.
#[macro_export]
macro_rules! define_schedule {
    ($ctor:expr) => {
        $crate::discovery::inventory::submit! {
            $crate::discovery::DefinitionUnit::new(
                module_path!(),
                $crate::discovery::Definition::Schedule($ctor),
            )
        }
    };
}

// ---------------------------------------------------------------------------
// Discovery
// ---------------------------------------------------------------------------

/// Selects registered units below a root module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovery {
    root: String,
    routes: String,
    startup: String,
    schedule: String,
}

impl Discovery {
    /// Units are looked up under `<root>::routes`, `<root>::startup` and
    /// `<root>::schedule`.
    pub fn new(root: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            routes: "routes".to_string(),
            startup: "startup".to_string(),
            schedule: "schedule".to_string(),
        }
    }

    #[must_use]
    pub fn with_routes_module(mut self, name: impl Into<String>) -> Self {
        self.routes = name.into();
        self
    }

    #[must_use]
    pub fn with_startup_module(mut self, name: impl Into<String>) -> Self {
        self.startup = name.into();
        self
    }

    #[must_use]
    pub fn with_schedule_module(mut self, name: impl Into<String>) -> Self {
        self.schedule = name.into();
        self
    }

    #[must_use]
    pub fn root(&self) -> &str {
        &self.root
    }

    /// Constructs every route defined under the routes module.
    ///
    /// # Errors
    ///
    /// The first constructor failure, with the defining module as context.
    pub fn routes(&self) -> anyhow::Result<Vec<Route>> {
        self.construct(&self.routes, |definition| match definition {
            Definition::Route(ctor) => Some(ctor),
            _ => None,
        })
    }

    /// Constructs every startup task defined under the startup module.
    ///
    /// # Errors
    ///
    /// The first constructor failure, with the defining module as context.
    pub fn startups(&self) -> anyhow::Result<Vec<Startup>> {
        self.construct(&self.startup, |definition| match definition {
            Definition::Startup(ctor) => Some(ctor),
            _ => None,
        })
    }

    /// Constructs every schedule defined under the schedule module.
    ///
    /// # Errors
    ///
    /// The first constructor failure, with the defining module as context.
    pub fn schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        self.construct(&self.schedule, |definition| match definition {
            Definition::Schedule(ctor) => Some(ctor),
            _ => None,
        })
    }

    fn construct<T>(
        &self,
        sub: &str,
        select: impl Fn(Definition) -> Option<fn() -> anyhow::Result<T>>,
    ) -> anyhow::Result<Vec<T>> {
        let prefix = format!("{}::{sub}", self.root);
        let mut units: Vec<_> = inventory::iter::<DefinitionUnit>()
            .filter(|unit| under(unit.module, &prefix))
            .filter_map(|unit| select(unit.definition).map(|ctor| (unit.module, ctor)))
            .collect();
        units.sort_by_key(|(module, _)| *module);

        units
            .into_iter()
            .map(|(module, ctor)| ctor().with_context(|| format!("failed to construct unit in {module}")))
            .collect()
    }
}

fn under(module: &str, prefix: &str) -> bool {
    module
        .strip_prefix(prefix)
        .is_some_and(|rest| rest.is_empty() || rest.starts_with("::"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
