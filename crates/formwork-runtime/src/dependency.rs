#![forbid(unsafe_code)]

//! Inter-field dependency rules and their resolution.
//!
//! A [`DependencyRule`] attached to field B names the fields B depends on
//! and what to derive from them: visibility, enablement, a computed value,
//! or an arbitrary reaction. The [`DependencyResolver`] stores the rules as
//! an arena graph (one node per field name, adjacency lists in both
//! directions), refuses cyclic rule sets, and wires one [`Effect`] per rule
//! in topological order.
//!
//! The resolver never owns field values. It reads and writes them through a
//! [`DependencyHost`], which the form implements. Effects hold only a weak
//! reference to the host.
//!
//! # Propagation
//!
//! A `compute` rule writes its result through the host. That write is an
//! ordinary observable change, so rules depending on the computed field
//! re-run in the same pass. Because the graph is acyclic this converges.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use ahash::AHashMap;
use formwork_core::{FormError, Result, Value, ValueMap};
use tracing::{debug, trace};

use crate::reactive::{Effect, Observable, Trigger};

type Predicate = Rc<dyn Fn(&ValueMap) -> bool>;
type ComputeFn = Rc<dyn Fn(&ValueMap) -> Value>;
type ReactionFn = Rc<dyn Fn(&DependencyContext<'_>)>;

/// What a field derives from the fields it depends on.
#[derive(Clone, Default)]
pub struct DependencyRule {
    depends_on: Vec<String>,
    show_when: Option<Predicate>,
    enable_when: Option<Predicate>,
    compute: Option<ComputeFn>,
    on_dependency_change: Option<ReactionFn>,
}

impl fmt::Debug for DependencyRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyRule")
            .field("depends_on", &self.depends_on)
            .field("show_when", &self.show_when.is_some())
            .field("enable_when", &self.enable_when.is_some())
            .field("compute", &self.compute.is_some())
            .field("on_dependency_change", &self.on_dependency_change.is_some())
            .finish()
    }
}

impl DependencyRule {
    pub fn new<I, S>(depends_on: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            depends_on: depends_on.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn show_when(mut self, f: impl Fn(&ValueMap) -> bool + 'static) -> Self {
        self.show_when = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn enable_when(mut self, f: impl Fn(&ValueMap) -> bool + 'static) -> Self {
        self.enable_when = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn compute(mut self, f: impl Fn(&ValueMap) -> Value + 'static) -> Self {
        self.compute = Some(Rc::new(f));
        self
    }

    /// Called after every change of a dependency (not on the initial run).
    #[must_use]
    pub fn on_dependency_change(mut self, f: impl Fn(&DependencyContext<'_>) + 'static) -> Self {
        self.on_dependency_change = Some(Rc::new(f));
        self
    }

    #[must_use]
    pub fn depends_on(&self) -> &[String] {
        &self.depends_on
    }

    #[must_use]
    pub fn has_compute(&self) -> bool {
        self.compute.is_some()
    }
}

/// How the resolver reaches field state.
pub trait DependencyHost {
    /// Current value of every field.
    fn values(&self) -> ValueMap;

    /// The value cell of `field`, for wiring change notifications.
    fn value_source(&self, field: &str) -> Option<Observable<Value>>;

    /// Write a derived value. Not subject to read-only checks or history.
    fn write_value(&self, field: &str, value: Value);

    /// Put `field` back to its initial value and clear `touched`.
    fn reset_field(&self, field: &str);

    fn set_visible(&self, field: &str, visible: bool);

    fn set_enabled(&self, field: &str, enabled: bool);

    /// True while the host is reinstating a recorded state. Reactions are
    /// skipped then; the recorded state already contains their effects.
    fn is_restoring(&self) -> bool {
        false
    }
}

/// Handed to `on_dependency_change` reactions.
pub struct DependencyContext<'a> {
    field: &'a str,
    values: &'a ValueMap,
    host: &'a dyn DependencyHost,
}

impl DependencyContext<'_> {
    /// The field owning the rule.
    #[must_use]
    pub fn field(&self) -> &str {
        self.field
    }

    /// Values as of the start of this run.
    #[must_use]
    pub fn values(&self) -> &ValueMap {
        self.values
    }

    #[must_use]
    pub fn value(&self, field: &str) -> Option<&Value> {
        self.values.get(field)
    }

    /// Reset the owning field.
    pub fn reset(&self) {
        self.host.reset_field(self.field);
    }

    /// Write the owning field.
    pub fn set_value(&self, value: impl Into<Value>) {
        self.host.write_value(self.field, value.into());
    }

    /// Write another field.
    pub fn set_field(&self, field: &str, value: impl Into<Value>) {
        self.host.write_value(field, value.into());
    }
}

/// Field names as arena nodes with adjacency in both directions.
#[derive(Debug, Default)]
struct Graph {
    index: AHashMap<String, usize>,
    names: Vec<String>,
    /// `depends_on[b]` contains `a` when b's rule depends on a.
    depends_on: Vec<Vec<usize>>,
    /// `dependents[a]` contains `b` when b's rule depends on a.
    dependents: Vec<Vec<usize>>,
}

impl Graph {
    fn node(&mut self, name: &str) -> usize {
        if let Some(&id) = self.index.get(name) {
            return id;
        }
        let id = self.names.len();
        self.index.insert(name.to_owned(), id);
        self.names.push(name.to_owned());
        self.depends_on.push(Vec::new());
        self.dependents.push(Vec::new());
        id
    }

    fn build(rules: &[(String, DependencyRule)]) -> Self {
        let mut graph = Self::default();
        for (field, rule) in rules {
            let b = graph.node(field);
            for dep in &rule.depends_on {
                let a = graph.node(dep);
                if !graph.depends_on[b].contains(&a) {
                    graph.depends_on[b].push(a);
                    graph.dependents[a].push(b);
                }
            }
        }
        graph
    }

    fn path_names(&self, path: &[usize]) -> Vec<String> {
        path.iter().map(|&id| self.names[id].clone()).collect()
    }

    /// DFS over `depends_on` edges. Calls `on_cycle` with each back edge's
    /// closed cycle; stops early when it returns `false`. Finished nodes are
    /// not revisited, so this proves acyclicity but misses some cycles.
    fn walk_cycles(&self, mut on_cycle: impl FnMut(Vec<usize>) -> bool) {
        #[derive(Clone, Copy, PartialEq)]
        enum Mark {
            New,
            OnPath,
            Done,
        }

        fn visit(
            graph: &Graph,
            node: usize,
            marks: &mut [Mark],
            path: &mut Vec<usize>,
            on_cycle: &mut dyn FnMut(Vec<usize>) -> bool,
        ) -> bool {
            marks[node] = Mark::OnPath;
            path.push(node);
            for &next in &graph.depends_on[node] {
                match marks[next] {
                    Mark::OnPath => {
                        let start = path.iter().position(|&n| n == next).unwrap_or(0);
                        let mut cycle = path[start..].to_vec();
                        cycle.push(next);
                        if !on_cycle(cycle) {
                            return false;
                        }
                    }
                    Mark::New => {
                        if !visit(graph, next, marks, path, on_cycle) {
                            return false;
                        }
                    }
                    Mark::Done => {}
                }
            }
            path.pop();
            marks[node] = Mark::Done;
            true
        }

        let mut marks = vec![Mark::New; self.names.len()];
        let mut path = Vec::new();
        for start in 0..self.names.len() {
            if marks[start] == Mark::New && !visit(self, start, &mut marks, &mut path, &mut on_cycle) {
                return;
            }
        }
    }

    fn first_cycle(&self) -> Option<Vec<String>> {
        let mut found = None;
        self.walk_cycles(|cycle| {
            found = Some(self.path_names(&cycle));
            false
        });
        found
    }

    /// Every elementary cycle exactly once, each starting at its
    /// lowest-numbered node. Unlike `walk_cycles` nothing is pruned across
    /// start nodes, so cycles sharing nodes are all found. Worst case is
    /// exponential; this is a diagnostic, not on the build path.
    fn all_cycles(&self) -> Vec<Vec<String>> {
        fn extend(
            graph: &Graph,
            start: usize,
            node: usize,
            on_path: &mut [bool],
            path: &mut Vec<usize>,
            out: &mut Vec<Vec<String>>,
        ) {
            on_path[node] = true;
            path.push(node);
            for &next in &graph.depends_on[node] {
                if next == start {
                    let mut cycle = path.clone();
                    cycle.push(start);
                    out.push(graph.path_names(&cycle));
                } else if next > start && !on_path[next] {
                    extend(graph, start, next, on_path, path, out);
                }
            }
            path.pop();
            on_path[node] = false;
        }

        let mut cycles = Vec::new();
        let mut on_path = vec![false; self.names.len()];
        let mut path = Vec::new();
        for start in 0..self.names.len() {
            extend(self, start, start, &mut on_path, &mut path, &mut cycles);
        }
        cycles
    }

    /// Kahn's algorithm: dependencies before dependents, ties in node order.
    fn topological(&self) -> Option<Vec<usize>> {
        let mut indegree: Vec<usize> = self.depends_on.iter().map(Vec::len).collect();
        let mut ready: std::collections::VecDeque<usize> =
            (0..self.names.len()).filter(|&n| indegree[n] == 0).collect();
        let mut order = Vec::with_capacity(self.names.len());
        while let Some(node) = ready.pop_front() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                indegree[dependent] -= 1;
                if indegree[dependent] == 0 {
                    ready.push_back(dependent);
                }
            }
        }
        (order.len() == self.names.len()).then_some(order)
    }
}

/// Owns the dependency rules of one form and the effects wired from them.
#[derive(Default)]
pub struct DependencyResolver {
    rules: RefCell<Vec<(String, DependencyRule)>>,
    effects: RefCell<Vec<Effect>>,
    initialized: Cell<bool>,
}

impl fmt::Debug for DependencyResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DependencyResolver")
            .field("rules", &self.rules.borrow().len())
            .field("effects", &self.effects.borrow().len())
            .field("initialized", &self.initialized.get())
            .finish()
    }
}

impl DependencyResolver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `rule` for `field`, replacing any earlier rule for it.
    pub fn register(&self, field: impl Into<String>, rule: DependencyRule) {
        let field = field.into();
        let mut rules = self.rules.borrow_mut();
        match rules.iter_mut().find(|(name, _)| *name == field) {
            Some(slot) => slot.1 = rule,
            None => rules.push((field, rule)),
        }
    }

    fn graph(&self) -> Graph {
        Graph::build(&self.rules.borrow())
    }

    #[must_use]
    pub fn has_circular_dependency(&self) -> bool {
        self.detect_cycle().is_some()
    }

    /// First cycle found, closed by repeating its first field.
    #[must_use]
    pub fn detect_cycle(&self) -> Option<Vec<String>> {
        self.graph().first_cycle()
    }

    /// Every distinct cycle, each closed by repeating its first field.
    #[must_use]
    pub fn find_circular_dependencies(&self) -> Vec<Vec<String>> {
        self.graph().all_cycles()
    }

    /// Fields whose rule depends on `field`, in registration order.
    #[must_use]
    pub fn dependents(&self, field: &str) -> Vec<String> {
        self.rules
            .borrow()
            .iter()
            .filter(|(_, rule)| rule.depends_on.iter().any(|d| d == field))
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Fields `field`'s rule depends on.
    #[must_use]
    pub fn dependencies(&self, field: &str) -> Vec<String> {
        self.rules
            .borrow()
            .iter()
            .find(|(name, _)| name == field)
            .map(|(_, rule)| rule.depends_on.clone())
            .unwrap_or_default()
    }

    /// Rule-bearing fields, dependencies first.
    pub fn evaluation_order(&self) -> Result<Vec<String>> {
        let graph = self.graph();
        let Some(order) = graph.topological() else {
            return Err(FormError::CircularDependency {
                cycle: graph.first_cycle().unwrap_or_default(),
            });
        };
        let rules = self.rules.borrow();
        Ok(order
            .into_iter()
            .map(|id| &graph.names[id])
            .filter(|name| rules.iter().any(|(field, _)| field == *name))
            .cloned()
            .collect())
    }

    /// Check the rules and wire one effect per rule.
    ///
    /// Fails without wiring anything if the rules contain a cycle or name a
    /// field the host does not know. Calling it again rewires from scratch.
    pub fn initialize(&self, host: &Rc<dyn DependencyHost>) -> Result<()> {
        let graph = self.graph();
        if let Some(cycle) = graph.first_cycle() {
            return Err(FormError::CircularDependency { cycle });
        }
        if let Some(unknown) = graph
            .names
            .iter()
            .find(|name| host.value_source(name).is_none())
        {
            return Err(FormError::unknown_field(unknown.as_str()));
        }

        self.dispose_effects();
        let order = self.evaluation_order()?;
        let rules = self.rules.borrow().clone();
        let mut effects = Vec::with_capacity(order.len());
        for field in order {
            let Some((_, rule)) = rules.iter().find(|(name, _)| *name == field) else {
                continue;
            };
            effects.push(wire(host, field, rule.clone()));
        }
        debug!(effects = effects.len(), "dependency rules wired");
        *self.effects.borrow_mut() = effects;
        self.initialized.set(true);
        Ok(())
    }

    fn dispose_effects(&self) {
        let effects = std::mem::take(&mut *self.effects.borrow_mut());
        for effect in &effects {
            effect.dispose();
        }
    }

    /// Dispose every effect and forget every rule. Idempotent.
    pub fn cleanup(&self) {
        self.dispose_effects();
        self.rules.borrow_mut().clear();
        if self.initialized.replace(false) {
            debug!("dependency resolver cleaned up");
        }
    }

    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.initialized.get()
    }

    #[must_use]
    pub fn rule_count(&self) -> usize {
        self.rules.borrow().len()
    }

    /// Live wired effects.
    #[must_use]
    pub fn effect_count(&self) -> usize {
        self.effects
            .borrow()
            .iter()
            .filter(|e| !e.is_disposed())
            .count()
    }
}

fn wire(host: &Rc<dyn DependencyHost>, field: String, rule: DependencyRule) -> Effect {
    let sources: Vec<Observable<Value>> = rule
        .depends_on
        .iter()
        .filter_map(|dep| host.value_source(dep))
        .collect();
    let triggers: Vec<&dyn Trigger> = sources.iter().map(|s| s as &dyn Trigger).collect();

    let weak: Weak<dyn DependencyHost> = Rc::downgrade(host);
    let first_run = Cell::new(true);
    let label = format!("dependency:{field}");
    Effect::new(label, &triggers, move || {
        let Some(host) = weak.upgrade() else {
            return;
        };
        let values = host.values();
        trace!(field = %field, "dependency rule run");
        if let Some(show) = &rule.show_when {
            host.set_visible(&field, show(&values));
        }
        if let Some(enable) = &rule.enable_when {
            host.set_enabled(&field, enable(&values));
        }
        if let Some(compute) = &rule.compute {
            host.write_value(&field, compute(&values));
        }
        if first_run.replace(false) {
            return;
        }
        if host.is_restoring() {
            trace!(field = %field, "reaction skipped during restore");
            return;
        }
        if let Some(react) = &rule.on_dependency_change {
            react(&DependencyContext {
                field: &field,
                values: &values,
                host: host.as_ref(),
            });
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Minimal host over plain observables.
    #[derive(Default)]
    struct TestHost {
        values: RefCell<Vec<(String, Observable<Value>)>>,
        initial: RefCell<ValueMap>,
        visible: RefCell<ValueMap>,
        enabled: RefCell<ValueMap>,
    }

    impl TestHost {
        fn with_fields(fields: &[(&str, Value)]) -> Rc<Self> {
            let host = Self::default();
            for (name, value) in fields {
                host.values
                    .borrow_mut()
                    .push(((*name).to_owned(), Observable::new(value.clone())));
                host.initial
                    .borrow_mut()
                    .insert((*name).to_owned(), value.clone());
            }
            Rc::new(host)
        }

        fn get(&self, field: &str) -> Value {
            self.value_source(field).map(|o| o.get()).unwrap_or_default()
        }

        fn set(&self, field: &str, value: impl Into<Value>) {
            if let Some(o) = self.value_source(field) {
                o.set(value.into());
            }
        }
    }

    impl DependencyHost for TestHost {
        fn values(&self) -> ValueMap {
            self.values
                .borrow()
                .iter()
                .map(|(k, o)| (k.clone(), o.get()))
                .collect()
        }

        fn value_source(&self, field: &str) -> Option<Observable<Value>> {
            self.values
                .borrow()
                .iter()
                .find(|(k, _)| k == field)
                .map(|(_, o)| o.clone())
        }

        fn write_value(&self, field: &str, value: Value) {
            self.set(field, value);
        }

        fn reset_field(&self, field: &str) {
            let initial = self.initial.borrow().get(field).cloned().unwrap_or_default();
            self.set(field, initial);
        }

        fn set_visible(&self, field: &str, visible: bool) {
            self.visible
                .borrow_mut()
                .insert(field.to_owned(), visible.into());
        }

        fn set_enabled(&self, field: &str, enabled: bool) {
            self.enabled
                .borrow_mut()
                .insert(field.to_owned(), enabled.into());
        }
    }

    fn as_host(host: &Rc<TestHost>) -> Rc<dyn DependencyHost> {
        Rc::clone(host) as Rc<dyn DependencyHost>
    }

    fn product(values: &ValueMap) -> Value {
        let factor = |k: &str| values.get(k).and_then(Value::as_f64).unwrap_or(0.0);
        Value::Float(factor("price") * factor("qty"))
    }

    #[test]
    fn two_field_cycle_is_reported_closed() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b"]));
        resolver.register("b", DependencyRule::new(["a"]));
        assert!(resolver.has_circular_dependency());
        assert_eq!(resolver.detect_cycle(), Some(vec!["a".into(), "b".into(), "a".into()]));
        assert_eq!(
            resolver.find_circular_dependencies(),
            vec![vec!["a".to_string(), "b".into(), "a".into()]]
        );
    }

    #[test]
    fn acyclic_rules_have_no_cycle() {
        let resolver = DependencyResolver::new();
        resolver.register("total", DependencyRule::new(["price", "qty"]));
        resolver.register("tax", DependencyRule::new(["total"]));
        assert!(!resolver.has_circular_dependency());
        assert!(resolver.find_circular_dependencies().is_empty());
    }

    #[test]
    fn self_dependency_is_a_cycle() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["a"]));
        assert_eq!(resolver.detect_cycle(), Some(vec!["a".into(), "a".into()]));
    }

    #[test]
    fn distinct_cycles_are_each_listed_once() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b"]));
        resolver.register("b", DependencyRule::new(["a"]));
        resolver.register("x", DependencyRule::new(["y"]));
        resolver.register("y", DependencyRule::new(["z"]));
        resolver.register("z", DependencyRule::new(["x"]));
        let cycles = resolver.find_circular_dependencies();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["x".into(), "y".into(), "z".into(), "x".into()]));
    }

    #[test]
    fn overlapping_cycles_are_all_listed() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b", "c"]));
        resolver.register("b", DependencyRule::new(["c"]));
        resolver.register("c", DependencyRule::new(["a"]));
        assert_eq!(
            resolver.find_circular_dependencies(),
            vec![
                vec!["a".to_string(), "b".into(), "c".into(), "a".into()],
                vec!["a".to_string(), "c".into(), "a".into()],
            ]
        );
    }

    #[test]
    fn self_loop_listed_with_other_cycles() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["a", "b"]));
        resolver.register("b", DependencyRule::new(["a"]));
        let cycles = resolver.find_circular_dependencies();
        assert_eq!(cycles.len(), 2);
        assert!(cycles.contains(&vec!["a".into(), "a".into()]));
        assert!(cycles.contains(&vec!["a".into(), "b".into(), "a".into()]));
    }

    #[test]
    fn dependents_and_dependencies() {
        let resolver = DependencyResolver::new();
        resolver.register("total", DependencyRule::new(["price", "qty"]));
        resolver.register("discount", DependencyRule::new(["qty"]));
        assert_eq!(resolver.dependents("qty"), vec!["total".to_string(), "discount".into()]);
        assert_eq!(resolver.dependencies("total"), vec!["price".to_string(), "qty".into()]);
        assert!(resolver.dependencies("price").is_empty());
    }

    #[test]
    fn register_replaces_previous_rule() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b"]));
        resolver.register("a", DependencyRule::new(["c"]));
        assert_eq!(resolver.rule_count(), 1);
        assert_eq!(resolver.dependencies("a"), vec!["c".to_string()]);
    }

    #[test]
    fn evaluation_order_puts_dependencies_first() {
        let resolver = DependencyResolver::new();
        resolver.register("grand", DependencyRule::new(["total", "tax"]));
        resolver.register("tax", DependencyRule::new(["total"]));
        resolver.register("total", DependencyRule::new(["price"]));
        let order = resolver.evaluation_order().unwrap();
        let pos = |f: &str| order.iter().position(|n| n == f).unwrap();
        assert!(pos("total") < pos("tax"));
        assert!(pos("tax") < pos("grand"));
        assert_eq!(order.len(), 3);
    }

    #[test]
    fn evaluation_order_fails_on_cycle() {
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b"]));
        resolver.register("b", DependencyRule::new(["a"]));
        assert!(matches!(
            resolver.evaluation_order(),
            Err(FormError::CircularDependency { .. })
        ));
    }

    #[test]
    fn compute_rule_writes_back_transitively() {
        let host = TestHost::with_fields(&[
            ("price", Value::Null),
            ("qty", Value::Null),
            ("total", Value::Null),
            ("label", Value::Null),
        ]);
        let resolver = DependencyResolver::new();
        resolver.register("label", DependencyRule::new(["total"]).compute(|v| {
            Value::from(format!("total: {}", v.get("total").cloned().unwrap_or_default()))
        }));
        resolver.register("total", DependencyRule::new(["price", "qty"]).compute(product));
        resolver.initialize(&as_host(&host)).unwrap();

        host.set("price", 100.0);
        host.set("qty", 5);
        assert_eq!(host.get("total"), Value::Float(500.0));
        assert_eq!(host.get("label"), Value::from("total: 500"));
        assert_eq!(resolver.effect_count(), 2);
    }

    #[test]
    fn visibility_and_enablement_follow_predicates() {
        let host = TestHost::with_fields(&[("kind", Value::from("personal")), ("company", Value::Null)]);
        let resolver = DependencyResolver::new();
        let is_business = |v: &ValueMap| v.get("kind").and_then(Value::as_str) == Some("business");
        resolver.register(
            "company",
            DependencyRule::new(["kind"])
                .show_when(is_business)
                .enable_when(is_business),
        );
        resolver.initialize(&as_host(&host)).unwrap();
        assert_eq!(host.visible.borrow().get("company"), Some(&Value::Bool(false)));

        host.set("kind", "business");
        assert_eq!(host.visible.borrow().get("company"), Some(&Value::Bool(true)));
        assert_eq!(host.enabled.borrow().get("company"), Some(&Value::Bool(true)));
    }

    #[test]
    fn reaction_skips_initial_run_and_can_reset() {
        let host = TestHost::with_fields(&[("country", Value::from("NZ")), ("region", Value::from("Otago"))]);
        let resolver = DependencyResolver::new();
        let calls = Rc::new(Cell::new(0));
        let c = Rc::clone(&calls);
        resolver.register(
            "region",
            DependencyRule::new(["country"]).on_dependency_change(move |ctx| {
                c.set(c.get() + 1);
                assert_eq!(ctx.field(), "region");
                ctx.set_value("pending");
                ctx.reset();
            }),
        );
        resolver.initialize(&as_host(&host)).unwrap();
        assert_eq!(calls.get(), 0);

        host.set("region", "Canterbury");
        host.set("country", "AU");
        assert_eq!(calls.get(), 1);
        assert_eq!(host.get("region"), Value::from("Otago"));
    }

    #[test]
    fn initialize_refuses_cycles_without_wiring() {
        let host = TestHost::with_fields(&[("a", Value::Null), ("b", Value::Null)]);
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["b"]).compute(|_| Value::Int(1)));
        resolver.register("b", DependencyRule::new(["a"]).compute(|_| Value::Int(2)));
        let err = resolver.initialize(&as_host(&host)).unwrap_err();
        assert!(matches!(err, FormError::CircularDependency { ref cycle } if cycle.len() == 3));
        assert_eq!(resolver.effect_count(), 0);
        assert!(!resolver.is_initialized());
        assert_eq!(host.get("a"), Value::Null);
    }

    #[test]
    fn initialize_refuses_unknown_fields() {
        let host = TestHost::with_fields(&[("a", Value::Null)]);
        let resolver = DependencyResolver::new();
        resolver.register("a", DependencyRule::new(["ghost"]));
        assert!(matches!(
            resolver.initialize(&as_host(&host)),
            Err(FormError::UnknownField { name }) if name == "ghost"
        ));
    }

    #[test]
    fn cleanup_is_idempotent_and_stops_effects() {
        let host = TestHost::with_fields(&[("a", Value::Int(1)), ("b", Value::Null)]);
        let resolver = DependencyResolver::new();
        resolver.register("b", DependencyRule::new(["a"]).compute(|v| v.get("a").cloned().unwrap_or_default()));
        resolver.initialize(&as_host(&host)).unwrap();
        assert_eq!(host.get("b"), Value::Int(1));

        resolver.cleanup();
        resolver.cleanup();
        host.set("a", 2);
        assert_eq!(host.get("b"), Value::Int(1));
        assert_eq!(resolver.effect_count(), 0);
        assert_eq!(resolver.rule_count(), 0);
    }

    #[test]
    fn dropped_host_makes_effects_inert() {
        let host = TestHost::with_fields(&[("a", Value::Int(1)), ("b", Value::Null)]);
        let a = host.value_source("a").unwrap();
        let resolver = DependencyResolver::new();
        resolver.register("b", DependencyRule::new(["a"]).compute(|_| Value::Int(0)));
        resolver.initialize(&as_host(&host)).unwrap();
        drop(host);
        a.set(Value::Int(5));
        assert_eq!(resolver.effect_count(), 1);
    }
}
