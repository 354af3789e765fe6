//! Payload codec
//!
//! Turns structured requests into frame payloads and terminal payloads back
//! into structured values. Everything here is pure: no I/O, no clocks.
//!
//! Baskets, payments, connect acknowledgements and fiscal records travel as
//! JSON objects. Unsolicited events use a small binary layout:
//!
//! ```text
//! SERIAL_IN:    tag (u32 LE) | UTF-8 text
//! DEVICE_STATE: connected (u8, 0/1) | UTF-8 device id
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use poslink_types::{Basket, DeviceClass, FiscalRecord, Payment};

use crate::{
    command::FrameKind,
    constants::MAX_TAX_PERCENT,
    error::{Error, Result},
    event::DeviceEvent,
    frame::Frame,
};

/// Connect acknowledgement payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectAck {
    #[serde(rename = "deviceIndex")]
    pub device_index: i32,

    #[serde(rename = "deviceId")]
    pub device_id: String,
}

impl ConnectAck {
    pub fn new(device_class: DeviceClass, device_id: impl Into<String>) -> Self {
        Self {
            device_index: device_class.index(),
            device_id: device_id.into(),
        }
    }

    pub fn device_class(&self) -> Result<DeviceClass> {
        DeviceClass::try_from(self.device_index)
            .map_err(|e| Error::MalformedResponse(e.to_string()))
    }
}

/// Check a basket before it is put on the wire
pub fn validate_basket(basket: &Basket) -> Result<()> {
    if basket.basket_id.trim().is_empty() {
        return Err(Error::invalid_field("basketID", "must not be empty"));
    }
    if basket.items.is_empty() {
        return Err(Error::invalid_field("items", "basket has no items"));
    }

    for (i, item) in basket.items.iter().enumerate() {
        if item.name.trim().is_empty() {
            return Err(Error::invalid_field(format!("items[{}].name", i), "must not be empty"));
        }
        if item.price < 0 {
            return Err(Error::invalid_field(
                format!("items[{}].price", i),
                format!("negative price {}", item.price),
            ));
        }
        if item.quantity <= 0 {
            return Err(Error::invalid_field(
                format!("items[{}].quantity", i),
                format!("quantity must be positive, got {}", item.quantity),
            ));
        }
        if !(0..=MAX_TAX_PERCENT).contains(&item.tax_percent) {
            return Err(Error::invalid_field(
                format!("items[{}].taxPercent", i),
                format!("{} outside 0..={}", item.tax_percent, MAX_TAX_PERCENT),
            ));
        }
    }

    if let Some(amount) = basket.tax_free_amount {
        if amount < 0 {
            return Err(Error::invalid_field("taxFreeAmount", format!("negative amount {}", amount)));
        }
    }

    if let Some(payments) = &basket.payment_items {
        for (i, payment) in payments.iter().enumerate() {
            check_payment(payment, &format!("paymentItems[{}]", i))?;
        }
    }

    Ok(())
}

/// Check a standalone payment
pub fn validate_payment(payment: &Payment) -> Result<()> {
    check_payment(payment, "payment")
}

fn check_payment(payment: &Payment, path: &str) -> Result<()> {
    if payment.amount <= 0 {
        return Err(Error::invalid_field(
            format!("{}.amount", path),
            format!("amount must be positive, got {}", payment.amount),
        ));
    }
    Ok(())
}

/// Encode a basket as a `SEND_BASKET` payload
pub fn encode_basket(basket: &Basket) -> Result<Bytes> {
    validate_basket(basket)?;
    Ok(Bytes::from(serde_json::to_vec(basket)?))
}

/// Decode a basket payload, rejecting anything `encode_basket` would not produce
pub fn decode_basket(payload: &[u8]) -> Result<Basket> {
    let basket: Basket = parse_json(payload)?;
    validate_basket(&basket).map_err(|e| Error::MalformedResponse(e.to_string()))?;
    Ok(basket)
}

/// Encode a payment as a `SEND_PAYMENT` payload
pub fn encode_payment(payment: &Payment) -> Result<Bytes> {
    validate_payment(payment)?;
    Ok(Bytes::from(serde_json::to_vec(payment)?))
}

pub fn decode_payment(payload: &[u8]) -> Result<Payment> {
    let payment: Payment = parse_json(payload)?;
    validate_payment(&payment).map_err(|e| Error::MalformedResponse(e.to_string()))?;
    Ok(payment)
}

pub fn encode_connect_ack(ack: &ConnectAck) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(ack)?))
}

/// Decode a connect acknowledgement; the device index must name a known class
pub fn decode_connect_ack(payload: &[u8]) -> Result<ConnectAck> {
    let ack: ConnectAck = parse_json(payload)?;
    ack.device_class()?;
    Ok(ack)
}

pub fn encode_fiscal_info(record: &FiscalRecord) -> Result<Bytes> {
    Ok(Bytes::from(serde_json::to_vec(record)?))
}

/// Decode fiscal info returned in an `ACK_DATA` frame
pub fn decode_fiscal_info(payload: &[u8]) -> Result<FiscalRecord> {
    parse_json(payload)
}

fn parse_json<'a, T: Deserialize<'a>>(payload: &'a [u8]) -> Result<T> {
    if payload.is_empty() {
        return Err(Error::MalformedResponse("empty payload".into()));
    }
    serde_json::from_slice(payload).map_err(|e| Error::MalformedResponse(e.to_string()))
}

/// Build the unsolicited frame for an event
pub fn encode_event(event: &DeviceEvent) -> Frame {
    match event {
        DeviceEvent::SerialInput { tag, payload } => {
            let mut buf = BytesMut::with_capacity(4 + payload.len());
            buf.put_u32_le(*tag);
            buf.put_slice(payload.as_bytes());
            Frame::unsolicited(FrameKind::SerialIn, buf.freeze())
        }
        DeviceEvent::StateChange {
            connected,
            device_id,
        } => {
            let mut buf = BytesMut::with_capacity(1 + device_id.len());
            buf.put_u8(u8::from(*connected));
            buf.put_slice(device_id.as_bytes());
            Frame::unsolicited(FrameKind::DeviceState, buf.freeze())
        }
    }
}

/// Decode an unsolicited frame into an event
pub fn decode_event(frame: &Frame) -> Result<DeviceEvent> {
    let mut buf = frame.payload.clone();

    match frame.kind {
        FrameKind::SerialIn => {
            if buf.len() < 4 {
                return Err(Error::MalformedResponse(format!(
                    "serial input needs 4 tag bytes, got {}",
                    buf.len()
                )));
            }
            let tag = buf.get_u32_le();
            Ok(DeviceEvent::SerialInput {
                tag,
                payload: utf8(buf)?,
            })
        }
        FrameKind::DeviceState => {
            if buf.is_empty() {
                return Err(Error::MalformedResponse("empty device state".into()));
            }
            let connected = match buf.get_u8() {
                0 => false,
                1 => true,
                other => {
                    return Err(Error::MalformedResponse(format!(
                        "device state flag {} is not 0 or 1",
                        other
                    )));
                }
            };
            Ok(DeviceEvent::StateChange {
                connected,
                device_id: utf8(buf)?,
            })
        }
        other => Err(Error::MalformedResponse(format!(
            "{} is not an unsolicited frame",
            other
        ))),
    }
}

fn utf8(buf: Bytes) -> Result<String> {
    String::from_utf8(buf.to_vec()).map_err(|e| Error::MalformedResponse(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use poslink_types::{BasketItem, CustomerInfo};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    fn x30tr_basket() -> Basket {
        Basket::new("a123ca24-ca2c-401c-8134-f0de2ec25c25", 9008)
            .with_customer_tax_id("11111111111")
            .with_item(
                BasketItem::new("İLAÇ", 1000, 1000)
                    .with_section(2)
                    .with_tax_percent(2000),
            )
            .with_tax_free_amount(5000)
            .with_payment(Payment::cash(6000, "Cash"))
    }

    #[test]
    fn test_encode_basket_sample() {
        let payload = encode_basket(&x30tr_basket()).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&payload).unwrap();

        assert_eq!(value["basketID"], "a123ca24-ca2c-401c-8134-f0de2ec25c25");
        assert_eq!(value["items"][0]["name"], "İLAÇ");
        assert_eq!(value["items"][0]["taxPercent"], 2000);
    }

    #[test]
    fn test_encode_basket_is_deterministic() {
        let basket = x30tr_basket();
        assert_eq!(encode_basket(&basket).unwrap(), encode_basket(&basket).unwrap());
    }

    #[test]
    fn test_basket_round_trip() {
        let basket = x30tr_basket();
        let decoded = decode_basket(&encode_basket(&basket).unwrap()).unwrap();

        assert_eq!(decoded, basket);
    }

    #[test]
    fn test_reject_empty_basket_id() {
        let basket = Basket::new("", 0).with_item(BasketItem::new("x", 1, 1));

        match encode_basket(&basket) {
            Err(Error::InvalidField { field, .. }) => assert_eq!(field, "basketID"),
            other => panic!("Expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_negative_price() {
        let basket = Basket::new("b", 0).with_item(BasketItem::new("x", -1, 1000));

        match encode_basket(&basket) {
            Err(Error::InvalidField { field, .. }) => assert_eq!(field, "items[0].price"),
            other => panic!("Expected InvalidField, got {:?}", other),
        }
    }

    #[test]
    fn test_reject_zero_quantity_and_bad_tax() {
        let zero_qty = Basket::new("b", 0).with_item(BasketItem::new("x", 1, 0));
        assert!(matches!(encode_basket(&zero_qty), Err(Error::InvalidField { .. })));

        let bad_tax = Basket::new("b", 0)
            .with_item(BasketItem::new("x", 1, 1).with_tax_percent(MAX_TAX_PERCENT + 1));
        assert!(matches!(encode_basket(&bad_tax), Err(Error::InvalidField { .. })));
    }

    #[test]
    fn test_reject_basket_without_items() {
        assert!(matches!(
            encode_basket(&Basket::new("b", 0)),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn test_decode_rejects_missing_basket_id() {
        let json = br#"{"documentType":0,"items":[{"name":"x","price":1,"quantity":1,"sectionNo":1,"taxPercent":0,"type":0}]}"#;

        assert!(matches!(decode_basket(json), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_payment_validation() {
        assert!(encode_payment(&Payment::cash(6000, "Nakit")).is_ok());
        assert!(matches!(
            encode_payment(&Payment::cash(0, "Nakit")),
            Err(Error::InvalidField { .. })
        ));
    }

    #[test]
    fn test_decode_fiscal_info() {
        let json = br#"{"serialNo":"TK0001","zNo":12,"receiptNo":3,"totalAmount":150000,"totalTax":25000,"deviceTime":"2024-05-01T10:00:00Z"}"#;
        let record = decode_fiscal_info(json).unwrap();

        assert_eq!(record.serial_number, "TK0001");
        assert_eq!(record.z_number, 12);
        assert!(record.device_time.is_some());
    }

    #[test]
    fn test_decode_fiscal_info_truncated() {
        let json = br#"{"serialNo":"TK0001","zNo":1"#;

        assert!(matches!(decode_fiscal_info(json), Err(Error::MalformedResponse(_))));
        assert!(matches!(decode_fiscal_info(b""), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_connect_ack_unknown_device() {
        let json = br#"{"deviceIndex":9,"deviceId":"x"}"#;

        assert!(matches!(decode_connect_ack(json), Err(Error::MalformedResponse(_))));
    }

    #[test]
    fn test_event_codec() {
        let event = DeviceEvent::SerialInput {
            tag: 17,
            payload: "CARD:4111".into(),
        };
        assert_eq!(decode_event(&encode_event(&event)).unwrap(), event);

        let state = DeviceEvent::StateChange {
            connected: true,
            device_id: "X30TR-01".into(),
        };
        assert_eq!(decode_event(&encode_event(&state)).unwrap(), state);
    }

    #[test]
    fn test_decode_event_truncated() {
        let frame = Frame::unsolicited(FrameKind::SerialIn, vec![1, 2]);
        assert!(matches!(decode_event(&frame), Err(Error::MalformedResponse(_))));

        let frame = Frame::unsolicited(FrameKind::DeviceState, vec![7]);
        assert!(matches!(decode_event(&frame), Err(Error::MalformedResponse(_))));
    }

    fn arb_item() -> impl Strategy<Value = BasketItem> {
        ("[a-zA-Z0-9 ]{0,12}[a-zA-Z]", 0i64..1_000_000, 1i64..100_000, 0u32..9, 0..=MAX_TAX_PERCENT, 0i32..3)
            .prop_map(|(name, price, quantity, section_no, tax_percent, item_type)| BasketItem {
                name,
                price,
                quantity,
                section_no,
                tax_percent,
                item_type,
            })
    }

    fn arb_payment() -> impl Strategy<Value = Payment> {
        (1i64..1_000_000, "[a-zA-Z ]{0,12}", 0i32..4).prop_map(|(amount, description, payment_type)| Payment {
            amount,
            description,
            payment_type,
        })
    }

    proptest! {
        #[test]
        fn prop_valid_baskets_round_trip(
            id in "[a-f0-9-]{1,36}[a-f0-9]",
            document_type in 0i32..10_000,
            customer in prop::option::of("[0-9]{10,11}"),
            items in prop::collection::vec(arb_item(), 1..5),
            tax_free in prop::option::of(0i64..100_000),
            payments in prop::option::of(prop::collection::vec(arb_payment(), 0..4)),
        ) {
            let mut basket = Basket::new(id, document_type);
            basket.customer_info = customer.map(|tax_id| CustomerInfo { tax_id });
            basket.items = items;
            basket.tax_free_amount = tax_free;
            basket.payment_items = payments;

            let decoded = decode_basket(&encode_basket(&basket).unwrap()).unwrap();
            prop_assert_eq!(decoded, basket);
        }
    }
}
