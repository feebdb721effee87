//! Control graph manager.
//!
//! A [`ControlGraph`] hands out control ids, keeps a weak registry of every
//! control it created for periodic expiration sweeps, and caches property
//! controls per (object, property) so each property is bridged by exactly
//! one control.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::config::GraphConfig;
use crate::connection::ConnectOptions;
use crate::control::{Control, ControlBehavior, ControlFlags, ControlId, EventBehavior, WeakControl};
use crate::controls::func::FuncControl;
use crate::controls::hub::new_hub;
use crate::controls::prop::{object_addr, OriginToken, PropChange, PropControl, PropertyObject};
use crate::controls::value::ValueControl;
use crate::value::{Value, ValueType};
use crate::Result;

type PropKey = (usize, Option<String>);

struct GraphInner {
    config: GraphConfig,
    next_id: AtomicU64,
    registry: Mutex<Vec<WeakControl>>,
    /// Property controls stay pinned here until their object is gone.
    props: Mutex<HashMap<PropKey, PropControl>>,
    /// One guard per key while its control is being created.
    creating: Mutex<HashMap<PropKey, Arc<Mutex<()>>>>,
    last_sweep: Mutex<Option<Instant>>,
}

/// Owner of control ids, the expiration registry and the property cache.
#[derive(Clone)]
pub struct ControlGraph(Arc<GraphInner>);

impl Default for ControlGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl ControlGraph {
    /// Graph with the default configuration.
    pub fn new() -> Self {
        Self::from_valid_config(GraphConfig::default())
    }

    pub fn builder() -> ControlGraphBuilder {
        ControlGraphBuilder::default()
    }

    pub fn with_config(config: GraphConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self::from_valid_config(config))
    }

    fn from_valid_config(config: GraphConfig) -> Self {
        Self(Arc::new(GraphInner {
            config,
            next_id: AtomicU64::new(1),
            registry: Mutex::new(Vec::new()),
            props: Mutex::new(HashMap::new()),
            creating: Mutex::new(HashMap::new()),
            last_sweep: Mutex::new(None),
        }))
    }

    pub fn config(&self) -> &GraphConfig {
        &self.0.config
    }

    /// Register a control with custom behavior.
    pub fn create_control(
        &self,
        behavior: Arc<dyn ControlBehavior>,
        flags: ControlFlags,
        value_type: Option<ValueType>,
    ) -> Control {
        let id = ControlId(self.0.next_id.fetch_add(1, Ordering::Relaxed));
        let control = Control::new(id, behavior, flags, value_type, self.0.config.max_outputs);
        self.0.registry.lock().push(control.downgrade());
        tracing::debug!("Created {} control {}", control.kind(), id);
        control
    }

    /// Plain send-only event control.
    pub fn control(&self) -> Control {
        self.create_control(Arc::new(EventBehavior), ControlFlags::SENDS, None)
    }

    pub fn func_control(&self) -> FuncControl {
        FuncControl::new(self)
    }

    pub fn value_control(&self) -> ValueControl {
        ValueControl::new(self)
    }

    /// Wildcard bus control forwarding everything it receives.
    pub fn hub_control(&self) -> Control {
        new_hub(self)
    }

    /// The control bridging `object.property`, created on first use.
    pub fn prop_control<O: PropertyObject>(&self, object: &Arc<O>, property: &str) -> Result<PropControl> {
        let object: Arc<dyn PropertyObject> = object.clone();
        self.prop_control_for(&object, Some(property))
    }

    /// The object-wide control carrying every property change of `object`.
    pub fn prop_events_control<O: PropertyObject>(&self, object: &Arc<O>) -> Result<PropControl> {
        let object: Arc<dyn PropertyObject> = object.clone();
        self.prop_control_for(&object, None)
    }

    fn prop_control_for(&self, object: &Arc<dyn PropertyObject>, property: Option<&str>) -> Result<PropControl> {
        let key: PropKey = (object_addr(object.as_ref()), property.map(str::to_string));
        if let Some(found) = self.cached(&key, object.as_ref()) {
            return Ok(found);
        }

        // Double-checked: contenders for the same key wait on one guard, and
        // the object's own callbacks never run under the cache lock.
        let guard = self
            .0
            .creating
            .lock()
            .entry(key.clone())
            .or_default()
            .clone();
        let created = {
            let _creating = guard.lock();
            match self.cached(&key, object.as_ref()) {
                Some(found) => Ok(found),
                None => PropControl::create(self, object, property).map(|created| {
                    let stale = self.0.props.lock().insert(key.clone(), created.clone());
                    drop(stale);
                    tracing::debug!(
                        "Bridged property {:?} with control {}",
                        property.unwrap_or("*"),
                        created.id()
                    );
                    created
                }),
            }
        };
        {
            let mut creating = self.0.creating.lock();
            if creating.get(&key).is_some_and(|g| Arc::ptr_eq(g, &guard)) {
                creating.remove(&key);
            }
        }
        created
    }

    fn cached(&self, key: &PropKey, object: &dyn PropertyObject) -> Option<PropControl> {
        let props = self.0.props.lock();
        props.get(key).filter(|c| c.is_bound_to(object)).cloned()
    }

    /// Existing property control, without creating one.
    pub fn cached_prop_control(&self, object: &dyn PropertyObject, property: Option<&str>) -> Option<PropControl> {
        self.cached(&(object_addr(object), property.map(str::to_string)), object)
    }

    /// Report that `object.property` changed to `value`. Notifies the
    /// property's control and the object's events control, if they exist.
    /// Pass the token received by `set_property` when the change was caused
    /// by the graph. Returns the number of controls notified.
    pub fn property_changed(
        &self,
        object: &dyn PropertyObject,
        property: &str,
        value: Value,
        origin: Option<&OriginToken>,
    ) -> usize {
        let (single, events) = {
            let props = self.0.props.lock();
            let addr = object_addr(object);
            let single = props
                .get(&(addr, Some(property.to_string())))
                .filter(|c| c.is_bound_to(object))
                .cloned();
            let events = props.get(&(addr, None)).filter(|c| c.is_bound_to(object)).cloned();
            (single, events)
        };

        let mut notified = 0;
        if let Some(events) = events {
            let change = PropChange::from_weak(events.weak_object(), property.to_string(), value.clone());
            events.notify(Value::PropChange(Arc::new(change)), origin);
            notified += 1;
        }
        if let Some(single) = single {
            single.notify(value, origin);
            notified += 1;
        }
        notified
    }

    /// Drop cached property controls whose object is gone.
    pub fn prune_props(&self) -> usize {
        let stale: Vec<PropControl> = {
            let mut props = self.0.props.lock();
            let dead: Vec<PropKey> = props
                .iter()
                .filter(|(_, c)| c.is_orphaned())
                .map(|(k, _)| k.clone())
                .collect();
            dead.iter().filter_map(|k| props.remove(k)).collect()
        };
        stale.len()
    }

    /// Release every cached property control of `object`.
    pub fn forget_object(&self, object: &dyn PropertyObject) -> usize {
        let addr = object_addr(object);
        let released: Vec<PropControl> = {
            let mut props = self.0.props.lock();
            let keys: Vec<PropKey> = props.keys().filter(|(a, _)| *a == addr).cloned().collect();
            keys.iter().filter_map(|k| props.remove(k)).collect()
        };
        released.len()
    }

    /// Connect `src.src_prop` to `dest.dest_prop` (same name when `None`).
    pub fn connect_objects<S, D>(
        &self,
        src: &Arc<S>,
        src_prop: &str,
        dest: &Arc<D>,
        dest_prop: Option<&str>,
        options: impl Into<ConnectOptions>,
    ) -> Result<()>
    where
        S: PropertyObject,
        D: PropertyObject,
    {
        let from = self.prop_control(src, src_prop)?;
        let to = self.prop_control(dest, dest_prop.unwrap_or(src_prop))?;
        from.connect(&to, options)
    }

    /// Connect an object property as the source of `dest`.
    pub fn connect_to_control<S: PropertyObject>(
        &self,
        src: &Arc<S>,
        property: &str,
        dest: &Control,
        options: impl Into<ConnectOptions>,
    ) -> Result<()> {
        self.prop_control(src, property)?.connect(dest, options)
    }

    /// Connect `src` to an object property.
    pub fn connect_from_control<D: PropertyObject>(
        &self,
        src: &Control,
        dest: &Arc<D>,
        property: &str,
        options: impl Into<ConnectOptions>,
    ) -> Result<()> {
        let to = self.prop_control(dest, property)?;
        src.connect(&to, options)
    }

    /// Live controls created by this graph.
    pub fn controls(&self) -> Vec<Control> {
        let weak: Vec<WeakControl> = self.0.registry.lock().clone();
        weak.iter().filter_map(WeakControl::upgrade).collect()
    }

    /// Evict inactive origins from every control's active list. Returns the
    /// number of entries evicted.
    pub fn do_event_expiration(&self) -> usize {
        let weak: Vec<WeakControl> = {
            let mut registry = self.0.registry.lock();
            registry.retain(WeakControl::is_alive);
            registry.clone()
        };
        let mut evicted = 0;
        for control in weak.iter().filter_map(WeakControl::upgrade) {
            evicted += control.expire_events();
        }
        let pruned = self.prune_props();
        tracing::trace!(
            "Expiration sweep evicted {} events, pruned {} property controls",
            evicted,
            pruned
        );
        evicted
    }

    /// Run an expiration sweep if the configured interval has elapsed since
    /// the last one. Returns the eviction count when a sweep ran.
    pub fn maintain(&self, now: Instant) -> Option<usize> {
        {
            let mut last = self.0.last_sweep.lock();
            if let Some(prev) = *last {
                if now.saturating_duration_since(prev) < self.0.config.expiration_interval {
                    return None;
                }
            }
            *last = Some(now);
        }
        Some(self.do_event_expiration())
    }
}

impl std::fmt::Debug for ControlGraph {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ControlGraph")
            .field("config", &self.0.config)
            .field("controls", &self.0.registry.lock().len())
            .field("prop_controls", &self.0.props.lock().len())
            .finish()
    }
}

/// Builder for [`ControlGraph`].
#[derive(Debug, Default)]
pub struct ControlGraphBuilder {
    config: GraphConfig,
}

impl ControlGraphBuilder {
    pub fn max_outputs(mut self, max: usize) -> Self {
        self.config.max_outputs = max;
        self
    }

    pub fn expiration_interval(mut self, interval: Duration) -> Self {
        self.config.expiration_interval = interval;
        self
    }

    pub fn config(mut self, config: GraphConfig) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Result<ControlGraph> {
        ControlGraph::with_config(self.config)
    }
}
