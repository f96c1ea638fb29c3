use crate::checksum::Sum16BitWords;
use crate::err::{Layer, LenError, LenSource};

/// IGMP message kind (RFC 2236; v1 report kept for compatibility).
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub enum IgmpMessageType {
    /// Membership query (0x11), general or group specific.
    MembershipQuery,
    /// IGMPv1 membership report (0x12).
    V1MembershipReport,
    /// IGMPv2 membership report (0x16).
    V2MembershipReport,
    /// Leave group (0x17).
    LeaveGroup,
}

impl IgmpMessageType {
    /// Numeric value used on the wire.
    pub fn value(self) -> u8 {
        use IgmpMessageType::*;
        match self {
            MembershipQuery => 0x11,
            V1MembershipReport => 0x12,
            V2MembershipReport => 0x16,
            LeaveGroup => 0x17,
        }
    }

    /// Decode from the wire value.
    pub fn from_value(value: u8) -> Option<IgmpMessageType> {
        use IgmpMessageType::*;
        match value {
            0x11 => Some(MembershipQuery),
            0x12 => Some(V1MembershipReport),
            0x16 => Some(V2MembershipReport),
            0x17 => Some(LeaveGroup),
            _ => None,
        }
    }
}

/// An IGMPv2 message (8 bytes on the wire, RFC 2236).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IgmpMessage {
    /// Kind of message.
    pub message_type: IgmpMessageType,
    /// Maximum response time in units of 1/10 second (queries only,
    /// zero elsewhere; an IGMPv1 querier sends zero here).
    pub max_resp_time: u8,
    /// Checksum over the whole IGMP message.
    pub checksum: u16,
    /// Group address (zero for a general query).
    pub group: [u8; 4],
}

impl IgmpMessage {
    /// Serialized size of an IGMPv2 message in bytes/octets.
    pub const LEN: usize = 8;

    /// Read an IGMP message from a slice. Unknown message types are
    /// reported as `Ok(None)` so they can be ignored per RFC 2236.
    pub fn from_slice(slice: &[u8]) -> Result<Option<IgmpMessage>, LenError> {
        if slice.len() < IgmpMessage::LEN {
            return Err(LenError {
                required_len: IgmpMessage::LEN,
                len: slice.len(),
                len_source: LenSource::Slice,
                layer: Layer::IgmpMessage,
            });
        }
        let Some(message_type) = IgmpMessageType::from_value(slice[0]) else {
            return Ok(None);
        };
        Ok(Some(IgmpMessage {
            message_type,
            max_resp_time: slice[1],
            checksum: u16::from_be_bytes([slice[2], slice[3]]),
            group: [slice[4], slice[5], slice[6], slice[7]],
        }))
    }

    /// Calculate the checksum of the message.
    pub fn calc_checksum(&self) -> u16 {
        Sum16BitWords::new()
            .add_2bytes([self.message_type.value(), self.max_resp_time])
            .add_4bytes(self.group)
            .ones_complement()
    }

    /// Returns the serialized form with the checksum freshly
    /// calculated.
    pub fn to_bytes(&self) -> [u8; 8] {
        let checksum_be = self.calc_checksum().to_be_bytes();
        [
            self.message_type.value(),
            self.max_resp_time,
            checksum_be[0],
            checksum_be[1],
            self.group[0],
            self.group[1],
            self.group[2],
            self.group[3],
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_values() {
        assert_eq!(0x11, IgmpMessageType::MembershipQuery.value());
        assert_eq!(0x16, IgmpMessageType::V2MembershipReport.value());
        assert_eq!(0x17, IgmpMessageType::LeaveGroup.value());
        for value in [0x11u8, 0x12, 0x16, 0x17] {
            assert_eq!(
                value,
                IgmpMessageType::from_value(value).unwrap().value()
            );
        }
        assert_eq!(None, IgmpMessageType::from_value(0x22));
    }

    #[test]
    fn round_trip() {
        let message = IgmpMessage {
            message_type: IgmpMessageType::V2MembershipReport,
            max_resp_time: 0,
            checksum: 0,
            group: [224, 0, 0, 251],
        };
        let bytes = message.to_bytes();
        let decoded = IgmpMessage::from_slice(&bytes).unwrap().unwrap();
        assert_eq!(decoded.message_type, message.message_type);
        assert_eq!(decoded.group, message.group);
        // serialized checksum verifies
        assert_eq!(decoded.checksum, decoded.calc_checksum());
    }

    #[test]
    fn unknown_type_is_none() {
        let bytes = [0x22u8, 0, 0, 0, 0, 0, 0, 0];
        assert_eq!(None, IgmpMessage::from_slice(&bytes).unwrap());
    }

    #[test]
    fn len_error() {
        assert!(IgmpMessage::from_slice(&[0u8; 7]).is_err());
    }
}
