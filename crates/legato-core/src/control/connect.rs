//! Connection install and teardown.

use std::sync::Arc;

use parking_lot::RwLockWriteGuard;

use super::{Control, ControlFlags, ControlNotification, ControlState};
use crate::connection::{
    insert_by_priority, ConnectFlags, ConnectOptions, Direction, InputConn, OutputConn, Transform,
};
use crate::event::TransformFn;
use crate::param::ParamSpec;
use crate::value::Value;
use crate::{Error, Result};

/// Write-lock two distinct controls in address order.
fn lock_pair<'a>(
    a: &'a Control,
    b: &'a Control,
) -> (
    RwLockWriteGuard<'a, ControlState>,
    RwLockWriteGuard<'a, ControlState>,
) {
    if a.addr() < b.addr() {
        let ga = a.state().write();
        let gb = b.state().write();
        (ga, gb)
    } else {
        let gb = b.state().write();
        let ga = a.state().write();
        (ga, gb)
    }
}

/// Check that `src → dest` may be added, given both locked states.
fn check_edge(
    src: &Control,
    src_state: &ControlState,
    dest: &Control,
    dest_state: &ControlState,
) -> Result<()> {
    if !src_state.flags.contains(ControlFlags::SENDS) {
        return Err(Error::MissingCapability {
            control: src.id(),
            capability: "sends",
        });
    }
    if !dest_state.flags.contains(ControlFlags::RECVS) {
        return Err(Error::MissingCapability {
            control: dest.id(),
            capability: "receives",
        });
    }
    if src_state.outputs.len() >= src.0.max_outputs {
        return Err(Error::ConnectionLimit {
            control: src.id(),
            limit: src.0.max_outputs,
        });
    }
    if src_state.outputs.iter().any(|c| c.dest.points_to(dest)) {
        return Err(Error::AlreadyConnected {
            src: src.id(),
            dest: dest.id(),
        });
    }
    Ok(())
}

fn transformed(value: Value, func: Option<&TransformFn>, dest: &Control) -> Value {
    let Some(func) = func else {
        return value;
    };
    let out = func(&value);
    match dest.value_type() {
        Some(ty) if out.value_type() != ty => out.convert(ty).unwrap_or(out),
        _ => out,
    }
}

impl Control {
    /// Connect this control's output to `dest`.
    ///
    /// Preconditions (capabilities, the output ceiling, duplicate edges, and
    /// for `INIT`/`SPEC` the initial value and descriptor) are all checked
    /// before anything is installed, so a failed connect leaves no trace.
    /// The destroy hooks of transforms it did not install run before it
    /// returns, after every lock is released.
    /// `BIDIR` also installs `dest → self` with the inbound transform.
    pub fn connect(&self, dest: &Control, options: impl Into<ConnectOptions>) -> Result<()> {
        let ConnectOptions {
            flags,
            priority,
            transform_out,
            transform_in,
        } = options.into();
        if self.ptr_eq(dest) {
            return Err(Error::SelfConnection(self.id()));
        }
        let out_func = transform_out.as_ref().map(|t| t.func().clone());

        let spec = if flags.contains(ConnectFlags::SPEC) {
            Some(dest.prepare_spec(self, out_func.as_deref())?)
        } else {
            None
        };
        let init = if flags.contains(ConnectFlags::INIT) {
            let value = transformed(self.get_value_native()?, out_func.as_deref(), dest);
            dest.coerce(dest.flags(), &value)?;
            Some(value)
        } else {
            None
        };

        let bidir = flags.contains(ConnectFlags::BIDIR);
        let reverse_flags = flags.without(ConnectFlags::INIT | ConnectFlags::SPEC);
        {
            // On rejection the guards drop before the transforms.
            let (mut src_state, mut dest_state) = lock_pair(self, dest);
            check_edge(self, &src_state, dest, &dest_state)?;
            if bidir {
                check_edge(dest, &dest_state, self, &src_state)?;
            }
            insert_by_priority(
                &mut src_state.outputs,
                OutputConn::new(dest, flags, priority, transform_out),
            );
            dest_state.inputs.push(InputConn {
                src: self.downgrade(),
                flags: flags | ConnectFlags::INPUT,
            });
            if bidir {
                insert_by_priority(
                    &mut dest_state.outputs,
                    OutputConn::new(self, reverse_flags, priority, transform_in),
                );
                src_state.inputs.push(InputConn {
                    src: dest.downgrade(),
                    flags: reverse_flags | ConnectFlags::INPUT,
                });
            }
        }
        tracing::debug!(
            "Connected control {} -> {}{}",
            self.id(),
            dest.id(),
            if bidir { " (bidirectional)" } else { "" }
        );

        if let Some(spec) = spec {
            dest.apply_spec(spec);
        }
        if let Some(value) = init {
            if let Err(e) = dest.set_value(value) {
                tracing::warn!("Initial value for control {} rejected: {}", dest.id(), e);
            }
        }

        let out_flags = flags.without(ConnectFlags::INPUT) | ConnectFlags::OUTPUT;
        self.notify(ControlNotification::Connected {
            peer: dest.id(),
            direction: Direction::Output,
            flags: out_flags,
        });
        dest.notify(ControlNotification::Connected {
            peer: self.id(),
            direction: Direction::Input,
            flags: flags | ConnectFlags::INPUT,
        });
        if bidir {
            dest.notify(ControlNotification::Connected {
                peer: self.id(),
                direction: Direction::Output,
                flags: reverse_flags | ConnectFlags::OUTPUT,
            });
            self.notify(ControlNotification::Connected {
                peer: dest.id(),
                direction: Direction::Input,
                flags: reverse_flags | ConnectFlags::INPUT,
            });
        }
        Ok(())
    }

    /// Remove the `self → dest` connection. Returns `false` if there was none.
    pub fn disconnect(&self, dest: &Control) -> bool {
        if self.ptr_eq(dest) {
            return false;
        }
        let removed = {
            let (mut src_state, mut dest_state) = lock_pair(self, dest);
            let pos = src_state.outputs.iter().position(|c| c.dest.points_to(dest));
            pos.map(|pos| {
                dest_state.inputs.retain(|i| !i.src.points_to(self));
                src_state.outputs.remove(pos)
            })
        };
        let Some(conn) = removed else {
            return false;
        };
        // Runs the destroy hook, outside both locks.
        drop(conn);

        tracing::debug!("Disconnected control {} -> {}", self.id(), dest.id());
        self.notify(ControlNotification::Disconnected {
            peer: dest.id(),
            direction: Direction::Output,
        });
        dest.notify(ControlNotification::Disconnected {
            peer: self.id(),
            direction: Direction::Input,
        });
        true
    }

    /// Remove every connection touching this control, inputs first.
    /// Returns the number of connections removed.
    pub fn disconnect_all(&self) -> usize {
        let mut removed = 0;
        let sources: Vec<_> = self
            .state()
            .read()
            .inputs
            .iter()
            .map(|i| i.src.clone())
            .collect();
        for src in sources {
            if let Some(src) = src.upgrade() {
                removed += src.disconnect(self) as usize;
            }
        }
        // Entries whose source is gone.
        self.state().write().inputs.retain(|i| i.src.is_alive());

        for dest in self.connections(Direction::Output) {
            removed += self.disconnect(&dest) as usize;
        }
        removed
    }

    /// Replace the transform on the `self → dest` connection. The previous
    /// transform is released, and its destroy hook runs, after the lock is
    /// released.
    pub fn set_transform(&self, dest: &Control, transform: Option<Transform>) -> Result<()> {
        let (func, destroy) = match transform.map(Transform::into_parts) {
            Some((func, destroy)) => (Some(func), destroy),
            None => (None, None),
        };
        let (old_func, old_destroy) = {
            let mut state = self.state().write();
            let conn = state
                .outputs
                .iter_mut()
                .find(|c| c.dest.points_to(dest))
                .ok_or(Error::NotConnected {
                    src: self.id(),
                    dest: dest.id(),
                })?;
            (
                std::mem::replace(&mut conn.transform, func),
                std::mem::replace(&mut conn.destroy, destroy),
            )
        };
        drop(old_func);
        if let Some(destroy) = old_destroy {
            destroy();
        }
        Ok(())
    }

    /// Transform installed on the `self → dest` connection.
    pub fn transform_of(&self, dest: &Control) -> Option<Arc<TransformFn>> {
        self.state()
            .read()
            .outputs
            .iter()
            .find(|c| c.dest.points_to(dest))
            .and_then(|c| c.transform.clone())
    }

    /// Derive this control's spec from `source`'s, optionally mapping its
    /// limits through `transform`.
    pub fn sync_spec(&self, source: &Control, transform: Option<&TransformFn>) -> Result<()> {
        let spec = self.prepare_spec(source, transform)?;
        self.apply_spec(spec);
        Ok(())
    }

    fn prepare_spec(&self, source: &Control, transform: Option<&TransformFn>) -> Result<ParamSpec> {
        let spec = source.get_spec().ok_or(Error::NoSpec(source.id()))?;
        let spec = match transform {
            Some(func) => spec.transform(self.value_type(), func)?,
            None => spec,
        };
        self.convert_spec(spec)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Priority;
    use crate::value::ValueType;
    use crate::ControlGraph;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn test_connect_requires_capabilities() {
        let graph = ControlGraph::new();
        let src = graph.control();
        let sink = graph.control();
        assert!(matches!(
            src.connect(&sink, ConnectFlags::NONE),
            Err(Error::MissingCapability {
                capability: "receives",
                ..
            })
        ));
        assert_eq!(src.output_count(), 0);
        assert_eq!(sink.input_count(), 0);
    }

    #[test]
    fn test_duplicate_and_self_connections_rejected() {
        let graph = ControlGraph::new();
        let a = graph.hub_control();
        let b = graph.hub_control();
        a.connect(&b, ConnectFlags::NONE).unwrap();
        assert!(matches!(
            a.connect(&b, ConnectFlags::NONE),
            Err(Error::AlreadyConnected { .. })
        ));
        assert!(matches!(
            a.connect(&a, ConnectFlags::NONE),
            Err(Error::SelfConnection(_))
        ));
        assert_eq!(a.output_count(), 1);
    }

    #[test]
    fn test_bidirectional_failure_leaves_nothing() {
        let graph = ControlGraph::new();
        let hub = graph.hub_control();
        let sink = graph.func_control();
        sink.assign_funcs(crate::FuncCallbacks::new().set(|_, _, _| {}))
            .unwrap();
        sink.set_flags(ControlFlags::RECVS).unwrap();
        assert!(matches!(
            hub.connect(&sink, ConnectOptions::new().bidirectional()),
            Err(Error::MissingCapability {
                capability: "sends",
                ..
            })
        ));
        assert_eq!(hub.output_count(), 0);
        assert_eq!(hub.input_count(), 0);
        assert_eq!(sink.input_count(), 0);
    }

    #[test]
    fn test_rejected_connect_releases_transforms() {
        let graph = ControlGraph::new();
        let hub = graph.hub_control();
        let sink = graph.control();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let counted = |t: Transform| {
            let d = destroyed.clone();
            t.on_destroy(move || {
                d.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert!(hub
            .connect(
                &sink,
                ConnectOptions::new()
                    .bidirectional()
                    .transform(counted(Transform::scale(2.0)))
                    .transform_in(counted(Transform::scale(0.5))),
            )
            .is_err());
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
        assert_eq!(hub.output_count(), 0);

        // Installed transforms are released by teardown only.
        let peer = graph.hub_control();
        hub.connect(&peer, ConnectOptions::new().transform(counted(Transform::scale(1.0))))
            .unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 2);
        assert!(hub.disconnect(&peer));
        assert_eq!(destroyed.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_priority_order() {
        let graph = ControlGraph::new();
        let src = graph.hub_control();
        let low = graph.hub_control();
        let high = graph.hub_control();
        let def = graph.hub_control();
        let med = graph.hub_control();
        src.connect(&low, Priority::Low).unwrap();
        src.connect(&high, Priority::High).unwrap();
        src.connect(&def, Priority::Default).unwrap();
        src.connect(&med, Priority::Medium).unwrap();
        let order: Vec<_> = src.connections(Direction::Output);
        assert_eq!(order, vec![high, def, med, low]);
    }

    #[test]
    fn test_set_transform_runs_old_destroy() {
        let graph = ControlGraph::new();
        let a = graph.hub_control();
        let b = graph.hub_control();
        let destroyed = Arc::new(AtomicUsize::new(0));
        let d = destroyed.clone();
        a.connect(
            &b,
            ConnectOptions::new().transform(Transform::scale(2.0).on_destroy(move || {
                d.fetch_add(1, Ordering::SeqCst);
            })),
        )
        .unwrap();
        assert!(a.transform_of(&b).is_some());
        a.set_transform(&b, None).unwrap();
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(a.transform_of(&b).is_none());
        assert!(a.disconnect(&b));
        assert_eq!(destroyed.load(Ordering::SeqCst), 1);
        assert!(matches!(
            a.set_transform(&b, None),
            Err(Error::NotConnected { .. })
        ));
    }

    #[test]
    fn test_disconnect_is_idempotent() {
        let graph = ControlGraph::new();
        let a = graph.hub_control();
        let b = graph.hub_control();
        a.connect(&b, ConnectFlags::NONE).unwrap();
        assert!(a.disconnect(&b));
        assert!(!a.disconnect(&b));
        assert!(!b.disconnect(&a));
        assert_eq!(a.output_count() + b.input_count(), 0);
    }

    #[test]
    fn test_spec_sync_on_connect() {
        let graph = ControlGraph::new();
        let src = graph.value_control();
        src.set_spec(ParamSpec::int("level", 0, 127, 64)).unwrap();
        let dest = graph.value_control();
        dest.set_value_type(ValueType::Double).unwrap();
        src.connect(
            &dest,
            ConnectOptions::new()
                .spec()
                .transform(Transform::scale(0.5)),
        )
        .unwrap();
        let spec = dest.get_spec().unwrap();
        assert_eq!(spec.value_type(), Some(ValueType::Double));
        let limits = spec.limits().unwrap();
        assert_eq!((limits.min, limits.max, limits.default), (0.0, 63.5, 32.0));
    }

    #[test]
    fn test_spec_connect_without_source_spec_fails_cleanly() {
        let graph = ControlGraph::new();
        let src = graph.hub_control();
        let dest = graph.value_control();
        assert!(matches!(
            src.connect(&dest, ConnectFlags::SPEC),
            Err(Error::NoSpec(_))
        ));
        assert_eq!(src.output_count(), 0);
    }

    #[test]
    fn test_disconnect_all() {
        let graph = ControlGraph::new();
        let hub = graph.hub_control();
        let peers: Vec<_> = (0..3).map(|_| graph.hub_control()).collect();
        peers[0].connect(&hub, ConnectFlags::NONE).unwrap();
        hub.connect(&peers[1], ConnectFlags::NONE).unwrap();
        hub.connect(&peers[2], ConnectFlags::BIDIR).unwrap();
        assert_eq!(hub.input_count(), 2);
        assert_eq!(hub.output_count(), 2);
        assert_eq!(hub.disconnect_all(), 4);
        assert_eq!(hub.input_count() + hub.output_count(), 0);
        assert!(peers.iter().all(|p| p.input_count() + p.output_count() == 0));
    }
}
