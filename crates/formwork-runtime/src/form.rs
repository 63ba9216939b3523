#![forbid(unsafe_code)]

//! The form aggregator.
//!
//! A [`Form`] owns one [`FieldState`] per descriptor, a
//! [`DependencyResolver`] wired to those fields, an optional
//! [`AsyncValidation`] per field, cross-field rules, and optionally a
//! [`HistoryManager`] over the whole value map. It is assembled by
//! [`FormBuilder`], which refuses inconsistent configurations (duplicate or
//! unknown fields, circular dependencies) before any state exists.
//!
//! # Form-level signals
//!
//! | signal           | true / contents                                              |
//! |------------------|--------------------------------------------------------------|
//! | `values`         | every field's current value                                  |
//! | `errors`         | every field's touched-gated sync error                       |
//! | `async_errors`   | every field's latest async verdict                           |
//! | `cross_errors`   | messages of failing cross-field rules                        |
//! | `valid`          | all values pass their contract, no async error, no cross error |
//! | `dirty`          | some value differs from its initial value                    |
//! | `pristine`       | no field touched                                             |
//! | `visible_fields` | names of fields the resolver shows                           |
//! | `loading`        | some async check in flight                                   |
//!
//! `valid` ignores `touched`: a fresh form with an empty required field is
//! invalid even though no error is displayed yet.
//!
//! # History
//!
//! Every public mutation records the resulting value map, unless it equals
//! the last recorded one. Restores (`undo`, `redo`, `go_to_checkpoint`)
//! write fields directly and are not recorded.
//!
//! # Runtime requirements
//!
//! Fields with an async validator start a debounced check on every value
//! change, and a history with a debounce starts a timer on every push. Both
//! spawn onto the current tokio `LocalSet`; such forms must be mutated
//! inside one.

use std::cell::{Cell, OnceCell, RefCell};
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;
use std::time::Duration;

use ahash::AHashMap;
use formwork_core::{
    Cx, CxController, FieldDescriptor, FormError, Result, Snapshot, Value, ValueMap, maps_equal,
};
use futures::future::join_all;
use tracing::{debug, trace};

use crate::async_validation::{AsyncValidation, AsyncValidatorFn, async_validator};
use crate::config::{FormConfig, HistoryConfig};
use crate::dependency::{DependencyHost, DependencyResolver, DependencyRule};
use crate::field::FieldState;
use crate::history::HistoryManager;
use crate::reactive::{BatchScope, Computed, Effect, Observable, Trigger};

/// Field name to optional message.
pub type ErrorMap = BTreeMap<String, Option<String>>;

type CrossCheck = Rc<dyn Fn(&ValueMap) -> Option<String>>;

/// A rule over several fields jointly, returning a message when violated.
#[derive(Clone)]
pub struct CrossFieldRule {
    fields: Vec<String>,
    check: CrossCheck,
    routed_to: Option<String>,
}

impl fmt::Debug for CrossFieldRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossFieldRule")
            .field("fields", &self.fields)
            .field("routed_to", &self.routed_to)
            .finish_non_exhaustive()
    }
}

impl CrossFieldRule {
    pub fn new<I, S>(fields: I, check: impl Fn(&ValueMap) -> Option<String> + 'static) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            fields: fields.into_iter().map(Into::into).collect(),
            check: Rc::new(check),
            routed_to: None,
        }
    }

    /// Attach this rule's message to one field (see
    /// [`Form::cross_errors_for`]).
    #[must_use]
    pub fn routed_to(mut self, field: impl Into<String>) -> Self {
        self.routed_to = Some(field.into());
        self
    }

    #[must_use]
    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    #[must_use]
    pub fn target(&self) -> Option<&str> {
        self.routed_to.as_deref()
    }

    #[must_use]
    pub fn check(&self, values: &ValueMap) -> Option<String> {
        (self.check)(values)
    }
}

/// Optional per-field configuration.
#[derive(Clone, Default)]
pub struct FieldConfig {
    initial: Option<Value>,
    readonly: bool,
    dependency: Option<DependencyRule>,
    async_validator: Option<AsyncValidatorFn>,
    async_debounce: Option<Duration>,
    async_timeout: Option<Duration>,
}

impl fmt::Debug for FieldConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FieldConfig")
            .field("initial", &self.initial)
            .field("readonly", &self.readonly)
            .field("dependency", &self.dependency)
            .field("async", &self.async_validator.is_some())
            .field("async_debounce", &self.async_debounce)
            .field("async_timeout", &self.async_timeout)
            .finish()
    }
}

impl FieldConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes precedence over the builder's initial value map.
    #[must_use]
    pub fn initial(mut self, value: impl Into<Value>) -> Self {
        self.initial = Some(value.into());
        self
    }

    #[must_use]
    pub fn readonly(mut self) -> Self {
        self.readonly = true;
        self
    }

    #[must_use]
    pub fn depends(mut self, rule: DependencyRule) -> Self {
        self.dependency = Some(rule);
        self
    }

    #[must_use]
    pub fn async_validator(mut self, validator: AsyncValidatorFn) -> Self {
        self.async_validator = Some(validator);
        self
    }

    /// Shorthand for [`async_validator`](Self::async_validator) with an
    /// `async` closure.
    #[must_use]
    pub fn async_check<F, Fut>(self, check: F) -> Self
    where
        F: Fn(Value, Cx) -> Fut + 'static,
        Fut: Future<Output = std::result::Result<Option<String>, formwork_core::AsyncCheckError>>
            + 'static,
    {
        self.async_validator(async_validator(check))
    }

    /// Overrides the form-wide async debounce for this field.
    #[must_use]
    pub fn debounce(mut self, debounce: Duration) -> Self {
        self.async_debounce = Some(debounce);
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.async_timeout = Some(timeout);
        self
    }
}

/// Assembles a [`Form`].
#[derive(Debug, Default)]
pub struct FormBuilder {
    descriptors: Vec<FieldDescriptor>,
    configs: Vec<(String, FieldConfig)>,
    cross_rules: Vec<CrossFieldRule>,
    initial: ValueMap,
    config: FormConfig,
}

impl FormBuilder {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, descriptor: FieldDescriptor) -> Self {
        self.descriptors.push(descriptor);
        self
    }

    #[must_use]
    pub fn field_with(self, descriptor: FieldDescriptor, config: FieldConfig) -> Self {
        let name = descriptor.name().to_owned();
        self.field(descriptor).configure(name, config)
    }

    /// Set (or replace) the configuration of a field by name.
    #[must_use]
    pub fn configure(mut self, name: impl Into<String>, config: FieldConfig) -> Self {
        let name = name.into();
        match self.configs.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = config,
            None => self.configs.push((name, config)),
        }
        self
    }

    #[must_use]
    pub fn cross_rule(mut self, rule: CrossFieldRule) -> Self {
        self.cross_rules.push(rule);
        self
    }

    #[must_use]
    pub fn initial_values(mut self, values: ValueMap) -> Self {
        self.initial = values;
        self
    }

    #[must_use]
    pub fn history(mut self, history: HistoryConfig) -> Self {
        self.config.history = Some(history);
        self
    }

    #[must_use]
    pub fn config(mut self, config: FormConfig) -> Self {
        self.config = config;
        self
    }

    fn check_names(&self) -> Result<AHashMap<String, usize>> {
        let mut index = AHashMap::with_capacity(self.descriptors.len());
        for (i, descriptor) in self.descriptors.iter().enumerate() {
            if index.insert(descriptor.name().to_owned(), i).is_some() {
                return Err(FormError::DuplicateField {
                    name: descriptor.name().to_owned(),
                });
            }
        }
        let known = |name: &str| -> Result<()> {
            if index.contains_key(name) {
                Ok(())
            } else {
                Err(FormError::unknown_field(name))
            }
        };
        for (name, _) in &self.configs {
            known(name)?;
        }
        for name in self.initial.keys() {
            known(name)?;
        }
        for rule in &self.cross_rules {
            for name in rule.fields.iter().chain(&rule.routed_to) {
                known(name)?;
            }
        }
        Ok(index)
    }

    /// Validate the configuration and activate the form.
    pub fn build(mut self) -> Result<Form> {
        self.config.validate()?;
        let index = self.check_names()?;

        let resolver = DependencyResolver::new();
        for (name, config) in &self.configs {
            if let Some(rule) = &config.dependency {
                resolver.register(name.as_str(), rule.clone());
            }
        }
        if let Some(cycle) = resolver.detect_cycle() {
            return Err(FormError::CircularDependency { cycle });
        }

        let (root_cx, root) = Cx::background();
        let default_debounce = self.config.async_debounce();
        let mut configs: AHashMap<String, FieldConfig> = self.configs.drain(..).collect();
        let mut computed = Vec::new();
        let fields: Vec<FieldState> = self
            .descriptors
            .iter()
            .enumerate()
            .map(|(i, descriptor)| {
                let name = descriptor.name();
                let config = configs.remove(name).unwrap_or_default();
                if config.dependency.as_ref().is_some_and(DependencyRule::has_compute) {
                    computed.push(i);
                }
                let initial = config
                    .initial
                    .or_else(|| self.initial.remove(name))
                    .unwrap_or_default();
                let async_validation = config.async_validator.map(|validator| {
                    let controller = AsyncValidation::with_parent(
                        name,
                        validator,
                        config.async_debounce.unwrap_or(default_debounce),
                        &root_cx,
                    );
                    match config.async_timeout {
                        Some(limit) => controller.with_timeout(limit),
                        None => controller,
                    }
                });
                FieldState::new(descriptor, initial, config.readonly, async_validation)
            })
            .collect();

        let cross_rules: Rc<[CrossFieldRule]> = self.cross_rules.into();
        let signals = Signals::new(&fields, Rc::clone(&cross_rules));
        let inner = Rc::new(FormInner {
            fields,
            index,
            computed,
            cross_rules,
            resolver,
            history: OnceCell::new(),
            watchers: RefCell::new(Vec::new()),
            root,
            destroyed: Cell::new(false),
            restoring: Rc::new(Cell::new(false)),
        });
        let form = Form { inner, signals };

        let host: Rc<dyn DependencyHost> = Rc::clone(&form.inner) as Rc<dyn DependencyHost>;
        form.inner.resolver.initialize(&host)?;
        form.inner.rebase_computed();

        if let Some(history) = &self.config.history {
            let manager =
                HistoryManager::new(&form.inner.values(), history.max_size, history.debounce());
            let _ = form.inner.history.set(manager);
        }
        form.inner.watch_async();

        debug!(
            fields = form.inner.fields.len(),
            rules = form.inner.resolver.rule_count(),
            cross_rules = form.inner.cross_rules.len(),
            history = form.inner.history.get().is_some(),
            "form built"
        );
        Ok(form)
    }
}

struct FormInner {
    fields: Vec<FieldState>,
    index: AHashMap<String, usize>,
    /// Fields with a `compute` rule.
    computed: Vec<usize>,
    cross_rules: Rc<[CrossFieldRule]>,
    resolver: DependencyResolver,
    history: OnceCell<HistoryManager<ValueMap>>,
    watchers: RefCell<Vec<Effect>>,
    root: CxController,
    destroyed: Cell<bool>,
    /// Set while `apply` writes a recorded state, until its notifications
    /// have drained.
    restoring: Rc<Cell<bool>>,
}

impl FormInner {
    fn field(&self, name: &str) -> Option<&FieldState> {
        self.index.get(name).map(|&i| &self.fields[i])
    }

    /// A computed field starts out, and resets to, whatever its rule
    /// produces, so it is never dirty on its own.
    fn rebase_computed(&self) {
        for &i in &self.computed {
            let field = &self.fields[i];
            field.initial().set(field.value().with(Snapshot::snapshot));
        }
    }

    fn watch_async(&self) {
        let mut watchers = self.watchers.borrow_mut();
        for field in &self.fields {
            let Some(controller) = field.async_validation() else {
                continue;
            };
            let (controller, value) = (controller.clone(), field.value().clone());
            watchers.push(Effect::lazy(
                format!("async:{}", field.name()),
                &[field.value()],
                move || controller.validate(value.get()),
            ));
        }
    }

    /// Write restored values. Read-only fields accept them.
    ///
    /// `on_dependency_change` reactions stay quiet until the writes have
    /// propagated, so the live values end up equal to `state`. The flag is
    /// cleared by a deferred entry queued behind the value notifications,
    /// which also holds when the caller is inside an outer batch.
    fn apply(&self, state: ValueMap) {
        self.restoring.set(true);
        let _batch = BatchScope::new();
        for (name, value) in state {
            if let Some(field) = self.field(&name) {
                field.value().set(value);
            }
        }
        let restoring = Rc::clone(&self.restoring);
        crate::reactive::batch::defer(Box::new(move || restoring.set(false)));
    }
}

impl DependencyHost for FormInner {
    fn values(&self) -> ValueMap {
        self.fields
            .iter()
            .map(|f| (f.name().to_owned(), f.value().get()))
            .collect()
    }

    fn value_source(&self, field: &str) -> Option<Observable<Value>> {
        self.field(field).map(|f| f.value().clone())
    }

    fn write_value(&self, field: &str, value: Value) {
        match self.field(field) {
            Some(f) => f.value().set(value),
            None => trace!(field, "derived write to unknown field ignored"),
        }
    }

    fn reset_field(&self, field: &str) {
        if let Some(f) = self.field(field) {
            f.revert();
        }
    }

    fn set_visible(&self, field: &str, visible: bool) {
        if let Some(f) = self.field(field) {
            f.visible().set(visible);
        }
    }

    fn is_restoring(&self) -> bool {
        self.restoring.get()
    }

    fn set_enabled(&self, field: &str, enabled: bool) {
        if let Some(f) = self.field(field) {
            f.enabled().set(enabled);
        }
    }
}

fn as_triggers<T: Trigger>(items: &[T]) -> Vec<&dyn Trigger> {
    items.iter().map(|t| t as &dyn Trigger).collect()
}

/// Derived form-level cells.
struct Signals {
    values: Computed<ValueMap>,
    errors: Computed<ErrorMap>,
    async_errors: Computed<ErrorMap>,
    cross_errors: Computed<Vec<String>>,
    valid: Computed<bool>,
    dirty: Computed<bool>,
    pristine: Computed<bool>,
    visible_fields: Computed<Vec<String>>,
    loading: Computed<bool>,
}

impl Signals {
    fn new(fields: &[FieldState], cross_rules: Rc<[CrossFieldRule]>) -> Self {
        let names: Rc<[String]> = fields.iter().map(|f| f.name().to_owned()).collect();
        let value_cells: Vec<Observable<Value>> = fields.iter().map(|f| f.value().clone()).collect();
        let error_cells: Vec<Computed<Option<String>>> =
            fields.iter().map(|f| f.error().clone()).collect();
        let async_cells: Vec<Option<Observable<Option<String>>>> = fields
            .iter()
            .map(|f| f.async_validation().map(|a| a.error().clone()))
            .collect();
        let async_present: Vec<Observable<Option<String>>> =
            async_cells.iter().flatten().cloned().collect();
        let loading_cells: Vec<Observable<bool>> = fields
            .iter()
            .filter_map(|f| f.async_validation().map(|a| a.loading().clone()))
            .collect();
        let validations: Vec<_> = fields.iter().map(|f| f.validation().clone()).collect();
        let dirty_cells: Vec<Computed<bool>> = fields.iter().map(|f| f.dirty().clone()).collect();
        let touched_cells: Vec<Observable<bool>> =
            fields.iter().map(|f| f.touched().clone()).collect();
        let visible_cells: Vec<Observable<bool>> =
            fields.iter().map(|f| f.visible().clone()).collect();

        let values: Computed<ValueMap> = {
            let (names, cells) = (Rc::clone(&names), value_cells.clone());
            Computed::from_sources(&as_triggers(&value_cells), move || {
                names.iter().cloned().zip(cells.iter().map(Observable::get)).collect()
            })
        };
        let errors: Computed<ErrorMap> = {
            let (names, cells) = (Rc::clone(&names), error_cells.clone());
            Computed::from_sources(&as_triggers(&error_cells), move || {
                names.iter().cloned().zip(cells.iter().map(Computed::get)).collect()
            })
        };
        let async_errors: Computed<ErrorMap> = {
            let names = Rc::clone(&names);
            let cells = async_cells.clone();
            Computed::from_sources(&as_triggers(&async_present), move || {
                names
                    .iter()
                    .cloned()
                    .zip(cells.iter().map(|c| c.as_ref().and_then(Observable::get)))
                    .collect()
            })
        };
        let cross_errors: Computed<Vec<String>> = {
            let snapshot = values.clone();
            Computed::from_sources(&[&values], move || {
                snapshot.with(|v| cross_rules.iter().filter_map(|r| r.check(v)).collect())
            })
        };
        let valid: Computed<bool> = {
            let mut sources = as_triggers(&validations);
            sources.extend(as_triggers(&async_present));
            sources.push(&cross_errors);
            let (verdicts, asyncs, cross) =
                (validations.clone(), async_present.clone(), cross_errors.clone());
            Computed::from_sources(&sources, move || {
                verdicts.iter().all(|v| v.with(|v| v.valid))
                    && asyncs.iter().all(|a| a.with(Option::is_none))
                    && cross.with(Vec::is_empty)
            })
        };
        let dirty: Computed<bool> = {
            let cells = dirty_cells.clone();
            Computed::from_sources(&as_triggers(&dirty_cells), move || {
                cells.iter().any(Computed::get)
            })
        };
        let pristine: Computed<bool> = {
            let cells = touched_cells.clone();
            Computed::from_sources(&as_triggers(&touched_cells), move || {
                !cells.iter().any(Observable::get)
            })
        };
        let visible_fields: Computed<Vec<String>> = {
            let (names, cells) = (Rc::clone(&names), visible_cells.clone());
            Computed::from_sources(&as_triggers(&visible_cells), move || {
                names
                    .iter()
                    .zip(&cells)
                    .filter(|(_, visible)| visible.get())
                    .map(|(name, _)| name.clone())
                    .collect()
            })
        };
        let loading: Computed<bool> = {
            let cells = loading_cells.clone();
            Computed::from_sources(&as_triggers(&loading_cells), move || {
                cells.iter().any(Observable::get)
            })
        };

        Self {
            values,
            errors,
            async_errors,
            cross_errors,
            valid,
            dirty,
            pristine,
            visible_fields,
            loading,
        }
    }
}

/// A live form. Dropping it destroys it.
pub struct Form {
    inner: Rc<FormInner>,
    signals: Signals,
}

impl fmt::Debug for Form {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Form")
            .field("fields", &self.inner.fields)
            .field("resolver", &self.inner.resolver)
            .field("history", &self.inner.history.get())
            .field("destroyed", &self.inner.destroyed.get())
            .finish()
    }
}

impl Form {
    #[must_use]
    pub fn builder() -> FormBuilder {
        FormBuilder::new()
    }

    // -- fields ---------------------------------------------------------

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldState> {
        self.inner.field(name)
    }

    /// Fields in declaration order.
    #[must_use]
    pub fn fields(&self) -> &[FieldState] {
        &self.inner.fields
    }

    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.inner.fields.iter().map(FieldState::name)
    }

    #[must_use]
    pub fn resolver(&self) -> &DependencyResolver {
        &self.inner.resolver
    }

    // -- signals --------------------------------------------------------

    #[must_use]
    pub fn values(&self) -> &Computed<ValueMap> {
        &self.signals.values
    }

    #[must_use]
    pub fn errors(&self) -> &Computed<ErrorMap> {
        &self.signals.errors
    }

    #[must_use]
    pub fn async_errors(&self) -> &Computed<ErrorMap> {
        &self.signals.async_errors
    }

    #[must_use]
    pub fn cross_errors(&self) -> &Computed<Vec<String>> {
        &self.signals.cross_errors
    }

    #[must_use]
    pub fn valid(&self) -> &Computed<bool> {
        &self.signals.valid
    }

    #[must_use]
    pub fn dirty(&self) -> &Computed<bool> {
        &self.signals.dirty
    }

    #[must_use]
    pub fn pristine(&self) -> &Computed<bool> {
        &self.signals.pristine
    }

    #[must_use]
    pub fn visible_fields(&self) -> &Computed<Vec<String>> {
        &self.signals.visible_fields
    }

    #[must_use]
    pub fn loading(&self) -> &Computed<bool> {
        &self.signals.loading
    }

    /// Messages of failing cross-field rules routed to `field`.
    #[must_use]
    pub fn cross_errors_for(&self, field: &str) -> Vec<String> {
        self.signals.values.with(|values| {
            self.inner
                .cross_rules
                .iter()
                .filter(|rule| rule.target() == Some(field))
                .filter_map(|rule| rule.check(values))
                .collect()
        })
    }

    // -- mutation -------------------------------------------------------

    fn ensure_live(&self) -> Result<()> {
        if self.inner.destroyed.get() {
            Err(FormError::Destroyed)
        } else {
            Ok(())
        }
    }

    fn known(&self, name: &str) -> Result<&FieldState> {
        self.ensure_live()?;
        self.inner
            .field(name)
            .ok_or_else(|| FormError::unknown_field(name))
    }

    fn writable(&self, name: &str) -> Result<&FieldState> {
        let field = self.known(name)?;
        if field.is_readonly() {
            return Err(FormError::ReadOnly {
                name: name.to_owned(),
            });
        }
        Ok(field)
    }

    /// Push the live value map unless it equals the last recorded one.
    fn record(&self) {
        let Some(history) = self.inner.history.get() else {
            return;
        };
        let values = self.inner.values();
        if maps_equal(&history.latest(), &values) {
            return;
        }
        history.push(&values, None);
    }

    pub fn set_value(&self, name: &str, value: impl Into<Value>) -> Result<()> {
        let field = self.writable(name)?;
        trace!(field = name, "set_value");
        field.value().set(value.into());
        self.record();
        Ok(())
    }

    /// Write untrusted input through the field's `transform_input`. Input
    /// the field cannot represent is stored raw so validation reports it.
    pub fn set_input(&self, name: &str, raw: impl Into<Value>) -> Result<()> {
        let field = self.writable(name)?;
        let raw = raw.into();
        let value = field.contract().transform_input(&raw).unwrap_or(raw);
        field.value().set(value);
        self.record();
        Ok(())
    }

    /// Write several fields in one batch. Nothing is written if any name is
    /// unknown or read-only.
    pub fn patch_values(&self, values: ValueMap) -> Result<()> {
        self.ensure_live()?;
        for name in values.keys() {
            self.writable(name)?;
        }
        {
            let _batch = BatchScope::new();
            for (name, value) in values {
                if let Some(field) = self.inner.field(&name) {
                    field.value().set(value);
                }
            }
        }
        self.record();
        Ok(())
    }

    pub fn touch(&self, name: &str) -> Result<()> {
        self.known(name)?.touch();
        Ok(())
    }

    /// Mark every field touched, surfacing every sync error.
    pub fn touch_all(&self) -> Result<()> {
        self.ensure_live()?;
        let _batch = BatchScope::new();
        for field in &self.inner.fields {
            field.touch();
        }
        Ok(())
    }

    /// Reinstall initial values (replaced by `new_initial` where given) and
    /// clear touched and async state.
    pub fn reset(&self, new_initial: Option<ValueMap>) -> Result<()> {
        self.ensure_live()?;
        let mut new_initial = new_initial.unwrap_or_default();
        if let Some(name) = new_initial.keys().find(|n| self.inner.field(n).is_none()) {
            return Err(FormError::unknown_field(name.as_str()));
        }
        {
            let _batch = BatchScope::new();
            for field in &self.inner.fields {
                let initial = new_initial
                    .remove(field.name())
                    .unwrap_or_else(|| field.initial().get());
                field.reset_to(initial);
            }
        }
        self.inner.rebase_computed();
        for controller in self.inner.fields.iter().filter_map(FieldState::async_validation) {
            controller.reset();
        }
        self.record();
        debug!("form reset");
        Ok(())
    }

    // -- reads ----------------------------------------------------------

    /// Trusted snapshot: each field's value run through its contract, or
    /// `Null` where it does not validate.
    #[must_use]
    pub fn get_values(&self) -> ValueMap {
        self.inner
            .fields
            .iter()
            .map(|f| (f.name().to_owned(), f.trusted_value()))
            .collect()
    }

    /// Snapshot of the fields whose value differs from their initial value.
    #[must_use]
    pub fn get_dirty_values(&self) -> ValueMap {
        self.inner
            .fields
            .iter()
            .filter(|f| f.dirty().get())
            .map(|f| (f.name().to_owned(), f.value().with(Snapshot::snapshot)))
            .collect()
    }

    pub fn format_value(&self, name: &str) -> Result<String> {
        self.inner
            .field(name)
            .map(FieldState::format)
            .ok_or_else(|| FormError::unknown_field(name))
    }

    /// Touch everything, run every async validator without debounce, and
    /// report whether the whole form is valid.
    pub async fn validate_all(&self) -> Result<bool> {
        self.touch_all()?;
        let checks: Vec<_> = self
            .inner
            .fields
            .iter()
            .filter_map(|f| f.async_validation().map(|a| (a.clone(), f.value().get())))
            .collect();
        debug!(async_checks = checks.len(), "validate_all");
        join_all(
            checks
                .into_iter()
                .map(|(controller, value)| async move { controller.validate_async(value).await }),
        )
        .await;
        self.ensure_live()?;
        Ok(self.signals.valid.get())
    }

    /// Whether any debounce timer or async check is outstanding.
    #[must_use]
    pub fn has_pending_work(&self) -> bool {
        self.inner
            .fields
            .iter()
            .filter_map(FieldState::async_validation)
            .any(AsyncValidation::is_pending)
            || self.inner.history.get().is_some_and(HistoryManager::has_pending)
    }

    /// Dispose every effect, cancel all async work, and tear down the
    /// resolver. Safe to call more than once.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.root.cancel();
        let watchers = std::mem::take(&mut *self.inner.watchers.borrow_mut());
        for watcher in &watchers {
            watcher.dispose();
        }
        for controller in self.inner.fields.iter().filter_map(FieldState::async_validation) {
            controller.reset();
        }
        self.inner.resolver.cleanup();
        if let Some(history) = self.inner.history.get() {
            history.cancel_pending();
        }
        debug!(fields = self.inner.fields.len(), "form destroyed");
    }

    #[must_use]
    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    // -- history --------------------------------------------------------

    #[must_use]
    pub fn history(&self) -> Option<&HistoryManager<ValueMap>> {
        self.inner.history.get()
    }

    fn live_history(&self) -> Result<&HistoryManager<ValueMap>> {
        self.ensure_live()?;
        self.inner.history.get().ok_or(FormError::HistoryDisabled)
    }

    /// Step back; `Ok(false)` when there is nothing to undo.
    pub fn undo(&self) -> Result<bool> {
        let state = self.live_history()?.undo();
        Ok(state.map(|s| self.inner.apply(s)).is_some())
    }

    pub fn redo(&self) -> Result<bool> {
        let state = self.live_history()?.redo();
        Ok(state.map(|s| self.inner.apply(s)).is_some())
    }

    /// Label the current state.
    pub fn checkpoint(&self, label: impl Into<String>) -> Result<()> {
        self.live_history()?.checkpoint(label);
        Ok(())
    }

    pub fn go_to_checkpoint(&self, label: &str) -> Result<()> {
        let state = self
            .live_history()?
            .go_to_checkpoint(label)
            .ok_or_else(|| FormError::CheckpointNotFound {
                label: label.to_owned(),
            })?;
        self.inner.apply(state);
        Ok(())
    }

    #[must_use]
    pub fn can_undo(&self) -> bool {
        self.inner.history.get().is_some_and(HistoryManager::can_undo)
    }

    #[must_use]
    pub fn can_redo(&self) -> bool {
        self.inner.history.get().is_some_and(HistoryManager::can_redo)
    }

    /// Forget undo/redo steps, keeping the current values.
    pub fn clear_history(&self) -> Result<()> {
        self.live_history()?.clear();
        Ok(())
    }
}

impl Drop for Form {
    fn drop(&mut self) {
        self.destroy();
    }
}
