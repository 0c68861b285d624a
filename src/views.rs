//! Views built from the `paths` of a schema document, arranged in a tree of
//! path fragments.
//!
//! A GET operation returning a list (an array, or an object whose `results`
//! is an array) makes a list view; any other GET makes a page view; a path
//! without GET makes an action view.

use std::rc::Rc;

use serde_json::{Map, Value};
use tracing::debug;

use crate::error::ResolveError;
use crate::models::{Model, ModelsResolver};
use crate::types::REF_PROPERTY;

const ACTION_METHODS: [&str; 4] = ["post", "put", "patch", "delete"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewKind {
    List,
    Page,
    Action,
}

impl ViewKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ViewKind::List => "list",
            ViewKind::Page => "page",
            ViewKind::Action => "action",
        }
    }
}

/// One path of the schema document.
#[derive(Debug, Clone)]
pub struct View {
    path: String,
    kind: ViewKind,
    name: String,
    hidden: bool,
    model: Option<Rc<Model>>,
}

impl View {
    pub fn new(path: impl Into<String>, kind: ViewKind, model: Option<Rc<Model>>) -> Self {
        let path = path.into();
        Self {
            name: path.clone(),
            path,
            kind,
            hidden: false,
            model,
        }
    }

    /// Hidden views get no route.
    pub fn hidden(mut self, hidden: bool) -> Self {
        self.hidden = hidden;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn kind(&self) -> ViewKind {
        self.kind
    }

    /// Route name; the path unless set otherwise.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    /// Model of the records this view shows or sends.
    pub fn model(&self) -> Option<&Rc<Model>> {
        self.model.as_ref()
    }

    /// Model of the listed records, for list views.
    pub fn list_model(&self) -> Option<&Rc<Model>> {
        match self.kind {
            ViewKind::List => self.model.as_ref(),
            _ => None,
        }
    }

    /// Whether the path has `{param}` placeholders.
    pub fn has_path_params(&self) -> bool {
        self.path.contains('{')
    }

    /// Router path: `{param}` placeholders become `:param`.
    pub fn route_path(&self) -> String {
        self.path.replace('{', ":").replace('}', "")
    }

    fn lists(&self, model: &str) -> bool {
        self.list_model().is_some_and(|m| m.name() == model)
    }
}

#[derive(Debug, Default)]
struct Node {
    fragment: String,
    view: Option<usize>,
    children: Vec<usize>,
    parent: Option<usize>,
}

/// All views, in document order, plus a tree of their path fragments.
#[derive(Debug)]
pub struct ViewsTree {
    views: Vec<View>,
    nodes: Vec<Node>,
}

fn path_fragments(path: &str) -> impl Iterator<Item = &str> {
    path.trim_matches('/').split('/').filter(|f| !f.is_empty())
}

impl ViewsTree {
    const ROOT: usize = 0;

    pub fn new(views: Vec<View>) -> Self {
        let mut tree = Self {
            views: Vec::with_capacity(views.len()),
            nodes: vec![Node::default()],
        };
        for view in views {
            tree.insert(view);
        }
        tree
    }

    /// Build views for every path of `document`, compiling response models.
    ///
    /// # Errors
    ///
    /// Returns the error compiling a referenced model.
    pub fn from_document(document: &Value, models: &ModelsResolver) -> Result<Self, ResolveError> {
        let mut views = Vec::new();
        if let Some(paths) = document.get("paths").and_then(Value::as_object) {
            for (path, item) in paths {
                let Some(item) = item.as_object() else {
                    continue;
                };
                views.push(build_view(path, item, models)?);
            }
        }
        debug!(count = views.len(), "built views");
        Ok(Self::new(views))
    }

    fn insert(&mut self, view: View) {
        let mut node = Self::ROOT;
        for fragment in path_fragments(&view.path) {
            node = self.ensure_child(node, fragment);
        }
        let idx = self.views.len();
        self.views.push(view);
        self.nodes[node].view = Some(idx);
    }

    fn ensure_child(&mut self, parent: usize, fragment: &str) -> usize {
        if let Some(&child) = self.nodes[parent]
            .children
            .iter()
            .find(|&&c| self.nodes[c].fragment == fragment)
        {
            return child;
        }
        let idx = self.nodes.len();
        self.nodes.push(Node {
            fragment: fragment.to_string(),
            view: None,
            children: Vec::new(),
            parent: Some(parent),
        });
        self.nodes[parent].children.push(idx);
        idx
    }

    fn node(&self, path: &str) -> Option<usize> {
        let mut node = Self::ROOT;
        for fragment in path_fragments(path) {
            node = *self.nodes[node]
                .children
                .iter()
                .find(|&&c| self.nodes[c].fragment == fragment)?;
        }
        Some(node)
    }

    /// Views in document order.
    pub fn views(&self) -> &[View] {
        &self.views
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn get(&self, path: &str) -> Option<&View> {
        let node = self.node(path)?;
        self.nodes[node].view.map(|idx| &self.views[idx])
    }

    fn view_at(&self, node: usize) -> Option<&View> {
        self.nodes[node].view.map(|idx| &self.views[idx])
    }

    fn siblings(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        self.nodes[node]
            .parent
            .map(|p| self.nodes[p].children.as_slice())
            .unwrap_or_default()
            .iter()
            .copied()
            .filter(move |&n| n != node)
    }

    fn parents(&self, node: usize) -> impl Iterator<Item = usize> + '_ {
        std::iter::successors(self.nodes[node].parent, move |&n| self.nodes[n].parent)
    }

    fn first_listing(
        &self,
        nodes: impl IntoIterator<Item = usize>,
        model: &str,
    ) -> Option<&View> {
        nodes
            .into_iter()
            .filter_map(|n| self.view_at(n))
            .find(|view| view.lists(model))
    }

    /// Find the list view serving `model` closest to `path`.
    ///
    /// Searches the view at `path`, its children, its siblings, then each
    /// ancestor together with the ancestor's siblings, and finally every
    /// top-level list view without path parameters.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::ModelNotFound` if no list view serves `model`.
    pub fn find_list_view(&self, model: &str, path: &str) -> Result<&View, ResolveError> {
        let not_found = || ResolveError::ModelNotFound {
            model: model.to_string(),
            path: path.to_string(),
        };
        let node = self.node(path).ok_or_else(not_found)?;

        let found = self
            .first_listing([node], model)
            .or_else(|| self.first_listing(self.nodes[node].children.iter().copied(), model))
            .or_else(|| self.first_listing(self.siblings(node), model))
            .or_else(|| {
                self.parents(node).find_map(|parent| {
                    self.first_listing(
                        std::iter::once(parent).chain(self.siblings(parent)),
                        model,
                    )
                })
            })
            .or_else(|| {
                self.views
                    .iter()
                    .filter(|view| !view.has_path_params())
                    .find(|view| view.lists(model))
            });
        found.ok_or_else(not_found)
    }
}

fn build_view(
    path: &str,
    item: &Map<String, Value>,
    models: &ModelsResolver,
) -> Result<View, ResolveError> {
    let flag = |value: Option<&Value>| value.and_then(|v| v.get("x-hidden")).and_then(Value::as_bool);
    let item_hidden = item.get("x-hidden").and_then(Value::as_bool).unwrap_or(false);

    if let Some(get) = item.get("get") {
        let hidden = item_hidden || flag(Some(get)).unwrap_or(false);
        let schema = response_schema(get);
        if let Some(items) = schema.and_then(list_items) {
            let model = compile_model(items, models)?;
            return Ok(View::new(path, ViewKind::List, model).hidden(hidden));
        }
        let model = match schema {
            Some(schema) => compile_model(schema, models)?,
            None => None,
        };
        return Ok(View::new(path, ViewKind::Page, model).hidden(hidden));
    }

    let operation = ACTION_METHODS.iter().find_map(|method| item.get(*method));
    let hidden = item_hidden || flag(operation).unwrap_or(false);
    let model = match operation.and_then(request_schema) {
        Some(schema) => compile_model(schema, models)?,
        None => None,
    };
    Ok(View::new(path, ViewKind::Action, model).hidden(hidden))
}

/// Schema of the 200 response (`schema` or `content.*.schema`).
fn response_schema(operation: &Value) -> Option<&Value> {
    let response = operation.get("responses")?.get("200")?;
    response.get("schema").or_else(|| {
        response
            .get("content")?
            .as_object()?
            .values()
            .find_map(|media| media.get("schema"))
    })
}

/// Schema of the request body (a `body` parameter or `requestBody`).
fn request_schema(operation: &Value) -> Option<&Value> {
    let from_parameters = operation
        .get("parameters")
        .and_then(Value::as_array)
        .and_then(|params| {
            params
                .iter()
                .find(|p| p.get("in").and_then(Value::as_str) == Some("body"))
        })
        .and_then(|p| p.get("schema"));
    from_parameters.or_else(|| {
        operation
            .get("requestBody")?
            .get("content")?
            .as_object()?
            .values()
            .find_map(|media| media.get("schema"))
    })
}

/// Item schema of a list response.
fn list_items(schema: &Value) -> Option<&Value> {
    if schema.get("type").and_then(Value::as_str) == Some("array") {
        return schema.get("items");
    }
    let results = schema.get("properties")?.get("results")?;
    if results.get("type").and_then(Value::as_str) == Some("array") {
        return results.get("items");
    }
    None
}

fn compile_model(schema: &Value, models: &ModelsResolver) -> Result<Option<Rc<Model>>, ResolveError> {
    let Some(schema) = schema.as_object() else {
        return Ok(None);
    };
    if schema.contains_key(REF_PROPERTY) || schema.get("properties").is_some_and(Value::is_object) {
        return models.by_schema_object(schema).map(Some);
    }
    Ok(None)
}
