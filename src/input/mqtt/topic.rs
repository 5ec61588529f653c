//! Classification of topics published on the gateway broker.

/// Everything the gateway publishes; classification picks what matters.
pub const SUBSCRIPTION: &str = "#";

/// Topic commands are written to.
pub const COMMAND_TOPIC: &str = "zigbee/recv";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InboundTopic<'a> {
    /// Property-bag reports from zigbee devices (`zigbee/send`)
    ZigbeeSend,
    /// Binary events from BLE devices (`log/ble`)
    BleLog,
    /// miIO log, not decoded
    MiioLog,
    /// Gateway heartbeat, not decoded
    Heartbeat,
    /// Radio statistics (`.../MessageReceived`, `.../devicestatechange`)
    MessageReceived,
    /// Host write on `<prefix>/<object_id>/set`
    StateSet { object_id: &'a str },
    Other,
}

impl<'a> InboundTopic<'a> {
    pub fn classify(topic: &'a str, state_prefix: &str) -> Self {
        match topic {
            "zigbee/send" => return InboundTopic::ZigbeeSend,
            "log/ble" => return InboundTopic::BleLog,
            "log/miio" => return InboundTopic::MiioLog,
            _ => {}
        }

        if topic.ends_with("/heartbeat") {
            return InboundTopic::Heartbeat;
        }
        if topic.ends_with("/MessageReceived") || topic.ends_with("/devicestatechange") {
            return InboundTopic::MessageReceived;
        }

        let prefix = state_prefix.trim_end_matches('/');
        if let Some(rest) = topic.strip_prefix(prefix).and_then(|r| r.strip_prefix('/'))
            && let Some(object_id) = rest.strip_suffix("/set")
            && !object_id.is_empty()
            && !object_id.contains('/')
        {
            return InboundTopic::StateSet { object_id };
        }

        InboundTopic::Other
    }

    /// Topics whose payload is decoded.
    pub fn is_handled(&self) -> bool {
        !matches!(
            self,
            InboundTopic::MiioLog | InboundTopic::Heartbeat | InboundTopic::Other
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        assert_eq!(InboundTopic::classify("zigbee/send", "gw3"), InboundTopic::ZigbeeSend);
        assert_eq!(InboundTopic::classify("log/ble", "gw3"), InboundTopic::BleLog);
        assert_eq!(InboundTopic::classify("log/miio", "gw3"), InboundTopic::MiioLog);
        assert_eq!(
            InboundTopic::classify("gw/54EF44AABBCC/heartbeat", "gw3"),
            InboundTopic::Heartbeat
        );
        assert_eq!(
            InboundTopic::classify("gw/54EF44AABBCC/MessageReceived", "gw3"),
            InboundTopic::MessageReceived
        );
        assert_eq!(
            InboundTopic::classify("gw/54EF44AABBCC/devicestatechange", "gw3"),
            InboundTopic::MessageReceived
        );
        assert_eq!(InboundTopic::classify("zigbee/recv", "gw3"), InboundTopic::Other);
    }

    #[test]
    fn test_state_set() {
        assert_eq!(
            InboundTopic::classify("gw3/00158d0001/set", "gw3/"),
            InboundTopic::StateSet {
                object_id: "00158d0001"
            }
        );
        assert_eq!(InboundTopic::classify("gw3/00158d0001/switch", "gw3"), InboundTopic::Other);
        assert_eq!(InboundTopic::classify("gw3/a/b/set", "gw3"), InboundTopic::Other);
        assert_eq!(InboundTopic::classify("other/a/set", "gw3"), InboundTopic::Other);
    }

    #[test]
    fn test_is_handled() {
        assert!(InboundTopic::ZigbeeSend.is_handled());
        assert!(!InboundTopic::Heartbeat.is_handled());
        assert!(!InboundTopic::Other.is_handled());
    }
}
