//! Packet type and its wire encoding
//!
//! A packet is encoded as the JSON array `[identifier, emitter, data]`.
//! `serde_json::Map` keeps keys sorted, so encoding is deterministic.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Identifier that ends the receiving session. Never broadcast.
pub const TERMINATION_IDENTIFIER: &str = "__relay_quit";

/// Emitter used when none is given
pub const UNKNOWN_EMITTER: &str = "unknown";

/// Open key/value payload carried by a packet
pub type PacketData = Map<String, Value>;

/// Unit of application-level message exchange
#[derive(Debug, Clone, PartialEq)]
pub struct Packet {
    identifier: String,
    emitter: String,
    data: PacketData,
}

impl Packet {
    /// Create a packet with an unknown emitter and an empty data bag
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            emitter: UNKNOWN_EMITTER.to_string(),
            data: PacketData::new(),
        }
    }

    /// Create a packet with every field given
    pub fn with_parts(
        identifier: impl Into<String>,
        emitter: impl Into<String>,
        data: PacketData,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            emitter: emitter.into(),
            data,
        }
    }

    /// Create the packet that asks the relay to end a session
    pub fn termination(emitter: impl Into<String>) -> Self {
        Self::with_parts(TERMINATION_IDENTIFIER, emitter, PacketData::new())
    }

    /// Builder-style emitter override
    pub fn emitted_by(mut self, emitter: impl Into<String>) -> Self {
        self.emitter = emitter.into();
        self
    }

    /// Builder-style data insertion
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    pub fn emitter(&self) -> &str {
        &self.emitter
    }

    pub fn data(&self) -> &PacketData {
        &self.data
    }

    pub fn is_termination(&self) -> bool {
        self.identifier == TERMINATION_IDENTIFIER
    }

    /// Set a data value, replacing any previous value for the key
    pub fn set_data(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Get a data value, `None` if the key is absent
    pub fn get_data(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Remove a data value. Absent keys are ignored.
    pub fn del_data(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Serialize packet to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize packet from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

impl Serialize for Packet {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        (&self.identifier, &self.emitter, &self.data).serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Packet {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let (identifier, emitter, data) = <(String, String, PacketData)>::deserialize(deserializer)?;
        Ok(Packet {
            identifier,
            emitter,
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_packet_roundtrip_nested() {
        let packet = Packet::new("chat")
            .emitted_by("alice")
            .with("msg", "hi")
            .with("n", 42)
            .with("ratio", 0.5)
            .with("flags", json!([true, false, null]))
            .with("nested", json!({"a": {"b": [1, 2, {"c": "d"}]}}));

        let bytes = packet.to_bytes().unwrap();
        let decoded = Packet::from_bytes(&bytes).unwrap();

        assert_eq!(decoded, packet);
        assert_eq!(decoded.get_data("nested"), Some(&json!({"a": {"b": [1, 2, {"c": "d"}]}})));
    }

    fn assert_roundtrip(packet: &Packet) {
        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(&decoded, packet);
    }

    #[test]
    fn test_roundtrip_hard_floats() {
        let hard = [
            1.0715660391465826e-75,
            -1.81996730402717e-179,
            -1.603964615428183e143,
            f64::MIN_POSITIVE,
            f64::MAX,
            f64::MIN,
            f64::EPSILON,
            5e-324,
            0.1 + 0.2,
            1e300,
            -0.0,
        ];
        for value in hard {
            assert_roundtrip(&Packet::new("f").with("v", value));
        }
    }

    #[test]
    fn test_roundtrip_many_floats() {
        // xorshift over raw bit patterns covers every exponent range
        let mut x: u64 = 0x9E37_79B9_7F4A_7C15;
        let mut checked = 0;
        while checked < 20_000 {
            x ^= x << 13;
            x ^= x >> 7;
            x ^= x << 17;
            let value = f64::from_bits(x);
            if !value.is_finite() {
                continue;
            }
            let packet = Packet::new("f").with("v", value);
            let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
            assert_eq!(
                decoded.get_data("v").and_then(Value::as_f64).map(f64::to_bits),
                Some(value.to_bits()),
                "float {:e} did not survive",
                value
            );
            checked += 1;
        }
    }

    #[test]
    fn test_roundtrip_integer_extremes() {
        let packet = Packet::new("ints")
            .with("u64_max", u64::MAX)
            .with("i64_min", i64::MIN)
            .with("i64_max", i64::MAX)
            .with("negative", -42i64)
            .with("zero", 0u64);
        assert_roundtrip(&packet);

        let decoded = Packet::from_bytes(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded.get_data("u64_max").and_then(Value::as_u64), Some(u64::MAX));
        assert_eq!(decoded.get_data("i64_min").and_then(Value::as_i64), Some(i64::MIN));
    }

    #[test]
    fn test_roundtrip_unicode() {
        let packet = Packet::with_parts("üñí", "Ωmega 🚀", PacketData::new())
            .with("ключ", "значение")
            .with("日本語", "テキスト")
            .with("emoji 🎉", json!(["👍", "\u{0}", "tab\tand\nnewline", "\"quoted\\\""]))
            .with("", "empty key");
        assert_roundtrip(&packet);
    }

    #[test]
    fn test_wire_shape_is_ordered_triple() {
        let packet = Packet::new("chat").emitted_by("A").with("msg", "hi");
        let value: Value = serde_json::from_slice(&packet.to_bytes().unwrap()).unwrap();
        assert_eq!(value, json!(["chat", "A", {"msg": "hi"}]));
    }

    #[test]
    fn test_encoding_is_deterministic() {
        let a = Packet::new("x").with("zeta", 1).with("alpha", 2).with("mid", 3);
        let b = Packet::new("x").with("mid", 3).with("alpha", 2).with("zeta", 1);
        assert_eq!(a.to_bytes().unwrap(), b.to_bytes().unwrap());
    }

    #[test]
    fn test_malformed_input_rejected() {
        assert!(Packet::from_bytes(b"not json").is_err());
        assert!(Packet::from_bytes(b"[\"only-one\"]").is_err());
        assert!(Packet::from_bytes(b"[1, \"e\", {}]").is_err());
        assert!(Packet::from_bytes(b"[\"i\", \"e\", []]").is_err());
        assert!(Packet::from_bytes(b"{\"identifier\": \"i\"}").is_err());
    }

    #[test]
    fn test_data_bag_operations() {
        let mut packet = Packet::new("state");
        assert_eq!(packet.emitter(), UNKNOWN_EMITTER);
        assert!(packet.get_data("missing").is_none());

        packet.set_data("k", "v1");
        packet.set_data("k", "v2");
        assert_eq!(packet.get_data("k"), Some(&json!("v2")));
        assert_eq!(packet.data().len(), 1);

        assert_eq!(packet.del_data("k"), Some(json!("v2")));
        assert_eq!(packet.del_data("k"), None);
        assert!(packet.data().is_empty());
    }

    #[test]
    fn test_termination_packet() {
        let packet = Packet::termination("bob");
        assert!(packet.is_termination());
        assert_eq!(packet.emitter(), "bob");
        assert!(!Packet::new("chat").is_termination());
    }
}
