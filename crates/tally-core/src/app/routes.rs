//! Route table - 外部に公開する操作の一覧
//!
//! HTTP サーバ自体は持たない。トランスポート側はこの表と `resolve` を使って
//! リクエストを `Operation` に振り分け、`PollService` の対応メソッドを呼ぶ。

use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Put,
    Delete,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unsupported method {0:?}")]
pub struct UnknownMethod(String);

impl FromStr for Method {
    type Err = UnknownMethod;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "GET" => Ok(Method::Get),
            "POST" => Ok(Method::Post),
            "PUT" => Ok(Method::Put),
            "DELETE" => Ok(Method::Delete),
            _ => Err(UnknownMethod(s.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    List,
    Add,
    Get,
    Put,
    Delete,
    Vote,
}

impl Operation {
    /// Whether the referer guard runs before this operation.
    pub fn guarded(self) -> bool {
        matches!(self, Operation::Add | Operation::Put | Operation::Vote)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Route {
    pub name: &'static str,
    pub method: Method,
    /// `{param}` セグメントはパスパラメータ
    pub path: &'static str,
    pub operation: Operation,
}

pub const ROUTES: &[Route] = &[
    Route {
        name: "list",
        method: Method::Get,
        path: "polls",
        operation: Operation::List,
    },
    Route {
        name: "add",
        method: Method::Post,
        path: "polls",
        operation: Operation::Add,
    },
    Route {
        name: "get",
        method: Method::Get,
        path: "polls/{uid}",
        operation: Operation::Get,
    },
    Route {
        name: "put",
        method: Method::Put,
        path: "polls/{uid}",
        operation: Operation::Put,
    },
    Route {
        name: "delete",
        method: Method::Delete,
        path: "polls/{uid}",
        operation: Operation::Delete,
    },
    Route {
        name: "vote",
        method: Method::Post,
        path: "polls/{uid}/vote/{answer}",
        operation: Operation::Vote,
    },
];

/// A resolved request: which route and the bound path parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMatch {
    pub route: &'static Route,
    pub params: Vec<(&'static str, String)>,
}

impl RouteMatch {
    pub fn operation(&self) -> Operation {
        self.route.operation
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v.as_str())
    }
}

/// Finds the route for `method` + `path`. Leading/trailing slashes are ignored.
pub fn resolve(method: Method, path: &str) -> Option<RouteMatch> {
    let segments: Vec<&str> = path.trim_matches('/').split('/').collect();
    ROUTES
        .iter()
        .filter(|route| route.method == method)
        .find_map(|route| {
            bind(route.path, &segments).map(|params| RouteMatch { route, params })
        })
}

fn bind(pattern: &'static str, segments: &[&str]) -> Option<Vec<(&'static str, String)>> {
    let parts: Vec<&'static str> = pattern.split('/').collect();
    if parts.len() != segments.len() {
        return None;
    }

    let mut params = Vec::new();
    for (part, segment) in parts.into_iter().zip(segments) {
        match part.strip_prefix('{').and_then(|p| p.strip_suffix('}')) {
            Some(name) if !segment.is_empty() => params.push((name, (*segment).to_string())),
            Some(_) => return None,
            None if part == *segment => {}
            None => return None,
        }
    }
    Some(params)
}
