//! Route list formed from views.

use serde::Serialize;
use tracing::debug;

use crate::signals::{route_created, Signals, ALL_ROUTES_CREATED};
use crate::views::{View, ViewsTree};

/// Name of the route serving `/`.
pub const HOME_ROUTE_NAME: &str = "home";
/// Name of the catch-all route.
pub const NOT_FOUND_ROUTE_NAME: &str = "404";

/// A navigable route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Route {
    pub name: String,
    pub path: String,
    /// Schema path of the view the route was generated from.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub view: Option<String>,
}

impl Route {
    pub fn new(name: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            view: None,
        }
    }

    /// Route of a view; hidden views produce none.
    pub fn from_view(view: &View) -> Option<Self> {
        if view.is_hidden() {
            return None;
        }
        Some(Self {
            name: view.name().to_string(),
            path: view.route_path(),
            view: Some(view.path().to_string()),
        })
    }
}

/// Form every route: home, one per visible view in order, then the
/// catch-all.
///
/// Emits `routes[<name>].created` with each route as it is added, then
/// `allRoutes.created` with the whole list. Handlers may edit the routes.
pub fn form_all_routes(views: &ViewsTree, signals: &Signals) -> Vec<Route> {
    let mut routes = Vec::with_capacity(views.len() + 2);

    let candidates = std::iter::once(Some(Route::new(HOME_ROUTE_NAME, "/")))
        .chain(views.views().iter().map(Route::from_view))
        .chain(std::iter::once(Some(Route::new(NOT_FOUND_ROUTE_NAME, "*"))));

    for mut route in candidates.flatten() {
        signals.emit(&route_created(&route.name), &mut route);
        routes.push(route);
    }

    debug!(count = routes.len(), "formed routes");
    signals.emit(ALL_ROUTES_CREATED, &mut routes);
    routes
}
