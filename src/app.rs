//! Application instance: owns the signal bus, registries, models, views and
//! routes built from one schema document.

use std::fmt;
use std::rc::Rc;

use serde_json::Value;
use tracing::{debug, info};

use crate::cache::{select_cache, Cache, DummyCache, FileStorage};
use crate::config::AppConfig;
use crate::error::{LoadError, ResolveError};
use crate::fields::{FieldContext, FieldsResolver};
use crate::loader::OpenApiLoader;
use crate::models::{Model, ModelsResolver};
use crate::router::{form_all_routes, Route};
use crate::signals::{Signals, APP_AFTER_INIT, APP_BEFORE_INIT, APP_CREATED};
use crate::views::ViewsTree;

type FieldsSetup = Box<dyn FnOnce(&FieldsResolver)>;

/// Collects everything an [`App`] is built from.
pub struct AppBuilder {
    config: AppConfig,
    document: Option<Value>,
    signals: Rc<Signals>,
    cache: Box<dyn Cache>,
    fields_setup: Vec<FieldsSetup>,
}

impl fmt::Debug for AppBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AppBuilder")
            .field("config", &self.config)
            .field("has_document", &self.document.is_some())
            .field("fields_setup", &self.fields_setup.len())
            .finish()
    }
}

impl Default for AppBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
            document: None,
            signals: Rc::new(Signals::new()),
            cache: Box::new(DummyCache),
            fields_setup: Vec::new(),
        }
    }

    /// Builder for `config`: opens its cache file and, when a schema source
    /// is configured, loads the document through that cache.
    ///
    /// # Errors
    ///
    /// Returns the error loading the schema source.
    pub fn from_config(config: AppConfig) -> Result<Self, LoadError> {
        let cache = select_cache(
            config.cache_file.clone().map(FileStorage::new),
            &config.cache_prefix,
        );
        let document = match &config.schema {
            Some(source) => Some(OpenApiLoader::new(cache.as_ref()).anon(config.anon).load(source)?),
            None => None,
        };
        Ok(Self {
            config,
            document,
            cache,
            ..Self::new()
        })
    }

    pub fn config(mut self, config: AppConfig) -> Self {
        self.config = config;
        self
    }

    pub fn document(mut self, document: Value) -> Self {
        self.document = Some(document);
        self
    }

    /// Share a signal bus, e.g. one with handlers already connected.
    pub fn signals(mut self, signals: Rc<Signals>) -> Self {
        self.signals = signals;
        self
    }

    pub fn cache(mut self, cache: Box<dyn Cache>) -> Self {
        self.cache = cache;
        self
    }

    /// Register custom fields before models are compiled.
    pub fn fields<F>(mut self, setup: F) -> Self
    where
        F: FnOnce(&FieldsResolver) + 'static,
    {
        self.fields_setup.push(Box::new(setup));
        self
    }

    /// Compile models, views and routes, then prepare every view's fields.
    ///
    /// Signals, in order: `APP_CREATED`, `app.beforeInit` (payload: the
    /// field registry), `models[..]` signals, `allModels.created`, route
    /// signals, `app.afterInit` (payload: the models resolver).
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidSchema` without a document, and any
    /// error compiling models or preparing fields, such as
    /// `ResolveError::ModelNotFound` for a foreign key without a list view.
    pub fn build(self) -> Result<App, ResolveError> {
        let document = Rc::new(self.document.ok_or_else(|| ResolveError::InvalidSchema {
            message: "no schema document".to_string(),
        })?);
        let signals = self.signals;
        signals.emit_sticky(APP_CREATED, &mut ());

        let mut fields = Rc::new(FieldsResolver::with_defaults(Rc::clone(&document)));
        for setup in self.fields_setup {
            setup(&fields);
        }
        signals.emit(APP_BEFORE_INIT, &mut fields);

        let models = Rc::new(ModelsResolver::new(fields, Rc::clone(&signals)));
        models.compile_all()?;

        let views = ViewsTree::from_document(&document, &models)?;
        let routes = form_all_routes(&views, &signals);

        for view in views.views() {
            let Some(model) = view.model() else {
                continue;
            };
            let ctx = FieldContext::new(&models)
                .with_views(&views)
                .on_page(view.path());
            model.prepare_for_view(view.path(), &ctx)?;
        }
        debug!(views = views.len(), "prepared view fields");

        signals.emit_sticky(APP_AFTER_INIT, &mut Rc::clone(&models));
        info!(
            models = models.models().len(),
            routes = routes.len(),
            "application initialized"
        );

        Ok(App {
            config: self.config,
            document,
            signals,
            cache: self.cache,
            models,
            views,
            routes,
        })
    }
}

/// A running application.
pub struct App {
    config: AppConfig,
    document: Rc<Value>,
    signals: Rc<Signals>,
    cache: Box<dyn Cache>,
    models: Rc<ModelsResolver>,
    views: ViewsTree,
    routes: Vec<Route>,
}

impl fmt::Debug for App {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("models", &self.models)
            .field("routes", &self.routes.len())
            .finish()
    }
}

impl App {
    pub fn builder() -> AppBuilder {
        AppBuilder::new()
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn document(&self) -> &Value {
        &self.document
    }

    pub fn signals(&self) -> &Signals {
        &self.signals
    }

    pub fn cache(&self) -> &dyn Cache {
        self.cache.as_ref()
    }

    pub fn fields(&self) -> &FieldsResolver {
        self.models.fields_resolver()
    }

    pub fn models(&self) -> &ModelsResolver {
        &self.models
    }

    /// Model compiled from `definitions/<name>`.
    ///
    /// # Errors
    ///
    /// Returns `ResolveError::InvalidReference` for unknown names.
    pub fn model(&self, name: &str) -> Result<Rc<Model>, ResolveError> {
        self.models.get(name)
    }

    pub fn views(&self) -> &ViewsTree {
        &self.views
    }

    pub fn routes(&self) -> &[Route] {
        &self.routes
    }

    /// Field context with views in scope and no active page.
    pub fn context(&self) -> FieldContext<'_> {
        FieldContext::new(&self.models).with_views(&self.views)
    }
}
