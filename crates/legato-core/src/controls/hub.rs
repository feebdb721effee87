//! Hub controls: a bus that forwards every event it receives to all outputs.
//!
//! Forwarding is unchecked so a hub never swallows an event because the
//! same origin already passed through it. Cycles are broken by the other
//! pass-through nodes on the path.

use crate::control::{Control, ControlBehavior, ControlFlags};
use crate::event::Event;
use crate::value::Value;
use crate::ControlGraph;

pub(crate) struct HubBehavior;

impl ControlBehavior for HubBehavior {
    fn kind(&self) -> &'static str {
        "hub"
    }

    fn set_value(&self, control: &Control, event: &Event, _value: &Value) {
        control.rebroadcast(event);
    }
}

pub(crate) fn new_hub(graph: &ControlGraph) -> Control {
    graph.create_control(
        std::sync::Arc::new(HubBehavior),
        ControlFlags::SENDRECV,
        None,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::ConnectFlags;
    use crate::value::ValueType;

    #[test]
    fn test_hub_forwards_any_type() {
        let graph = ControlGraph::new();
        let hub = graph.hub_control();
        let ints = graph.value_control();
        let text = graph.value_control();
        text.set_value_type(ValueType::String).unwrap();
        hub.connect(&ints, ConnectFlags::NONE).unwrap();
        hub.connect(&text, ConnectFlags::NONE).unwrap();

        hub.set_value(Value::Int(12)).unwrap();
        assert_eq!(ints.value(), Some(Value::Int(12)));
        assert_eq!(text.value(), Some(Value::from("12")));
    }

    #[test]
    fn test_hub_is_wildcard() {
        let graph = ControlGraph::new();
        let hub = graph.hub_control();
        assert_eq!(hub.kind(), "hub");
        assert_eq!(hub.value_type(), None);
        assert_eq!(hub.flags(), ControlFlags::SENDRECV);
    }
}
