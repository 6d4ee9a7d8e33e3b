use crate::types::{AuthSnapshot, Role};

/// What a route guard should render for the current auth snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteDecision {
    /// Render a neutral loading state. Never redirect from here.
    Loading,
    RedirectToLogin,
    RedirectToUnauthorized,
    /// Render the protected content.
    Render,
}

/// Decide how to treat a route restricted to `allowed_roles`.
///
/// A transient `resolving` state with an identity already known renders
/// loading, never a redirect: redirecting mid-resolution is exactly the
/// flicker/bounce this core exists to prevent. Redirect decisions are
/// only made once the snapshot is settled.
pub fn route_decision(snapshot: &AuthSnapshot, allowed_roles: &[Role]) -> RouteDecision {
    if snapshot.identity.is_none() {
        if snapshot.loading {
            return RouteDecision::Loading;
        }
        return RouteDecision::RedirectToLogin;
    }

    if snapshot.loading {
        return RouteDecision::Loading;
    }

    match snapshot.role {
        Some(role) if allowed_roles.contains(&role) => RouteDecision::Render,
        _ => RouteDecision::RedirectToUnauthorized,
    }
}
