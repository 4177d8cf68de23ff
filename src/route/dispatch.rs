use std::sync::Arc;

use http::StatusCode;

use crate::request::{RequestCtx, RouteAction};
use crate::route::expand::expand_tokens;
use crate::route::ops::{run_target, run_update, test_condition};
use crate::route::{Host, Route, MAX_REWRITES, NOT};

impl Host {
    /// Find the matching route and handler for a request.
    ///
    /// This process may rewrite the request path and may finalize a
    /// response (redirects, auth challenges, write targets). On return the
    /// request carries its selected route and handler; failures bind the
    /// pass handler with an error response.
    pub fn dispatch(&self, ctx: &mut RequestCtx) {
        let mut next = 0;
        let mut rewrites = 0;
        let mut selected: Option<Arc<Route>> = None;

        while rewrites < MAX_REWRITES {
            if next >= self.route_count() {
                break;
            }

            let index = next;
            let route = self.route_at(index).clone();
            next += 1;

            if let Some(ref segment) = route.start_segment {
                if !ctx.rx.path_info.starts_with(segment.as_str()) {
                    // Failed to match the first URI segment, skip the group.
                    next = self.next_group(index);
                    continue;
                }
            }

            if let Some(ref start_with) = route.start_with {
                if !ctx.rx.path_info.starts_with(start_with.as_str()) {
                    // Failed to match the starting literal of the pattern.
                    continue;
                }
            }

            match self.match_route(ctx, &route) {
                RouteAction::Reroute => {
                    next = 0;
                    selected = None;
                    rewrites += 1;
                }
                RouteAction::Ok => {
                    selected = Some(route);
                    break;
                }
                RouteAction::Reject => {}
            }
        }

        if rewrites >= MAX_REWRITES {
            ctx.route = Some(self.default_route().clone());
            ctx.handler = Some(self.pass_handler().clone());
            ctx.error(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Too many request rewrites",
            );
            return;
        }

        let route = match selected {
            Some(route) if ctx.handler.is_some() => route,
            Some(_) => {
                // A route matched but nothing will handle it.
                ctx.route = Some(self.default_route().clone());
                ctx.handler = Some(self.pass_handler().clone());
                ctx.error(StatusCode::INTERNAL_SERVER_ERROR, "Cannot find handler");
                return;
            }
            None => {
                ctx.route = Some(self.default_route().clone());
                ctx.handler = Some(self.pass_handler().clone());
                ctx.error(
                    StatusCode::METHOD_NOT_ALLOWED,
                    "Cannot find suitable route for request method",
                );
                return;
            }
        };

        tracing::debug!(
            "selected route \"{}\" target {:?}",
            route.name,
            route.target_rule
        );

        if ctx.rx.uri.len() > route.limits.uri_size {
            ctx.error(StatusCode::URI_TOO_LONG, "Request URI too long");
        }

        ctx.route = Some(route);

        if ctx.tx.finalized {
            // The pass handler can transmit the error.
            ctx.handler = Some(self.pass_handler().clone());
        }

        if let Some(ref handler) = ctx.handler {
            tracing::debug!(
                "selected handler \"{}\" for \"{}\"",
                handler.name(),
                ctx.rx.uri
            );
        }
    }

    fn match_route(&self, ctx: &mut RequestCtx, route: &Arc<Route>) -> RouteAction {
        // Remove the route prefix. Restore after matching if rejected.
        let saved_path = match route.prefix {
            Some(ref prefix) => {
                if !ctx.rx.path_info.starts_with(prefix.as_str()) {
                    return RouteAction::Reject;
                }
                let saved = ctx.rx.path_info.clone();
                let stripped = &saved[prefix.len()..];
                ctx.rx.path_info = if stripped.is_empty() {
                    "/".to_owned()
                } else {
                    stripped.to_owned()
                };
                ctx.rx.script_name = prefix.clone();
                Some(saved)
            }
            None => None,
        };

        let mut rc = self.match_request_uri(ctx, route);
        if rc == RouteAction::Ok {
            rc = self.check_route(ctx, route);
        }

        if rc == RouteAction::Reject {
            if let Some(saved) = saved_path {
                // Keep the modified path for Ok and Reroute.
                ctx.rx.path_info = saved;
                ctx.rx.script_name.clear();
            }
        }

        rc
    }

    fn match_request_uri(&self, ctx: &mut RequestCtx, route: &Route) -> RouteAction {
        if let Some(ref regex) = route.compiled {
            tracing::trace!(
                "test route \"{}\" regex {} against {}",
                route.name,
                route.optimized_pattern,
                ctx.rx.path_info
            );

            match regex.captures(&ctx.rx.path_info) {
                Some(caps) => {
                    if route.flags & NOT != 0 {
                        return RouteAction::Reject;
                    }
                    ctx.matches = caps
                        .iter()
                        .map(|m| m.map(|m| (m.start(), m.end())))
                        .collect();
                }
                None => {
                    if route.flags & NOT == 0 {
                        return RouteAction::Reject;
                    }
                    // Inverted match: synthesize a whole-string capture.
                    ctx.matches = vec![Some((0, ctx.rx.path_info.len()))];
                }
            }
        } else if !route.pattern.is_empty() {
            // Pattern compilation failed; the route can never match.
            return RouteAction::Reject;
        } else {
            ctx.matches.clear();
        }

        let methods = &route.methods;
        if !methods.contains(&ctx.rx.method) && !methods.contains("*") {
            // A HEAD request matches routes permitting GET.
            if !(ctx.rx.method == "HEAD" && methods.contains("GET")) {
                return RouteAction::Reject;
            }
        }

        RouteAction::Ok
    }

    fn check_route(&self, ctx: &mut RequestCtx, route: &Arc<Route>) -> RouteAction {
        ctx.rx.target = match route.target {
            Some(ref target) => expand_tokens(ctx, route, target),
            None => ctx.rx.path_info.trim_start_matches('/').to_owned(),
        };

        for guard in route.headers.iter() {
            tracing::trace!("test route \"{}\" header \"{}\"", route.name, guard.name);
            if let Some(value) = ctx.header(&guard.name) {
                let mut matched = guard.pattern.is_match(value);
                if guard.not {
                    matched = !matched;
                }
                if !matched {
                    return RouteAction::Reject;
                }
            }
        }

        for guard in route.param_checks.iter() {
            tracing::trace!("test route \"{}\" param \"{}\"", route.name, guard.name);
            let value = ctx.param(&guard.name).unwrap_or("");
            let mut matched = guard.pattern.is_match(value);
            if guard.not {
                matched = !matched;
            }
            if !matched {
                return RouteAction::Reject;
            }
        }

        for condition in route.conditions.iter() {
            let mut rc = test_condition(ctx, route, condition);
            if rc == RouteAction::Reroute {
                return rc;
            }
            if condition.not {
                rc = match rc {
                    RouteAction::Ok => RouteAction::Reject,
                    RouteAction::Reject => RouteAction::Ok,
                    other => other,
                };
            }
            if rc == RouteAction::Reject {
                return rc;
            }
        }

        for update in route.updates.iter() {
            let rc = run_update(ctx, route, update);
            if rc == RouteAction::Reroute {
                return rc;
            }
        }

        if let Some(ref prefix) = route.prefix {
            // Some handler match routines need this.
            let prefix = prefix.clone();
            ctx.set_param("prefix", &prefix);
        }

        let rc = self.select_handler(ctx, route);
        if rc != RouteAction::Ok {
            return rc;
        }

        // Extract the captured tokens by name into request parameters.
        for (i, token) in route.tokens.iter().enumerate() {
            if let Some(Some((start, end))) = ctx.matches.get(i + 1).copied() {
                let value = ctx.rx.path_info[start..end].to_owned();
                ctx.set_param(token, &value);
            }
        }

        let rc = run_target(ctx, route);
        if rc != RouteAction::Ok {
            return rc;
        }

        if let Some(handler) = ctx.handler.clone() {
            return handler.rewrite(ctx);
        }

        RouteAction::Ok
    }

    fn select_handler(&self, ctx: &mut RequestCtx, route: &Route) -> RouteAction {
        if ctx.rx.method == "TRACE" {
            // The TRACE method is always processed by the pass handler.
            ctx.handler = Some(self.pass_handler().clone());
            return RouteAction::Ok;
        }

        if let Some(ref handler) = route.handler {
            ctx.handler = Some(handler.clone());
            return RouteAction::Ok;
        }

        for handler in route.handlers.iter() {
            let rc = handler.matches(ctx, route);
            if rc == RouteAction::Ok || rc == RouteAction::Reroute {
                ctx.handler = Some(handler.clone());
                return rc;
            }
        }

        // Now match by extension, falling back to the empty-extension entry.
        let ext = ctx.ext().map(str::to_owned).unwrap_or_default();
        let handler = route
            .extensions
            .get(&ext)
            .or_else(|| route.extensions.get(""));

        if let Some(handler) = handler {
            ctx.handler = Some(handler.clone());
            return RouteAction::Ok;
        }

        if route.handlers.is_empty() && route.extensions.is_empty() {
            // Nothing was configured; the pass handler transmits whatever
            // the target rule produced.
            ctx.handler = Some(self.pass_handler().clone());
            return RouteAction::Ok;
        }

        ctx.handler = None;
        RouteAction::Reject
    }
}
