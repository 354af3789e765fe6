//! Basket and payment structures
//!
//! Field names follow the terminal's JSON schema (`basketID`, `sectionNo`,
//! `taxPercent`, ...). Monetary amounts and quantities are integers in the
//! device's minor units: a price of `1000` is 10.00 and a quantity of `1000`
//! is 1.000 pieces. Tax percentages are hundredths of a percent, so `2000`
//! means 20%.

use serde::{Deserialize, Serialize};

/// A transaction basket sent to the terminal before settlement
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Basket {
    /// Unique basket identifier (usually a UUID)
    #[serde(rename = "basketID")]
    pub basket_id: String,

    /// Fiscal document type (e.g. 9008 on X30TR, 0 on 300TR)
    #[serde(rename = "documentType")]
    pub document_type: i32,

    #[serde(rename = "customerInfo", default, skip_serializing_if = "Option::is_none")]
    pub customer_info: Option<CustomerInfo>,

    #[serde(default)]
    pub items: Vec<BasketItem>,

    #[serde(rename = "taxFreeAmount", default, skip_serializing_if = "Option::is_none")]
    pub tax_free_amount: Option<i64>,

    /// Payment allocations embedded in the basket (X30TR)
    #[serde(rename = "paymentItems", default, skip_serializing_if = "Option::is_none")]
    pub payment_items: Option<Vec<Payment>>,
}

impl Basket {
    pub fn new(basket_id: impl Into<String>, document_type: i32) -> Self {
        Self {
            basket_id: basket_id.into(),
            document_type,
            customer_info: None,
            items: Vec::new(),
            tax_free_amount: None,
            payment_items: None,
        }
    }

    pub fn with_item(mut self, item: BasketItem) -> Self {
        self.items.push(item);
        self
    }

    pub fn with_customer_tax_id(mut self, tax_id: impl Into<String>) -> Self {
        self.customer_info = Some(CustomerInfo {
            tax_id: tax_id.into(),
        });
        self
    }

    pub fn with_tax_free_amount(mut self, amount: i64) -> Self {
        self.tax_free_amount = Some(amount);
        self
    }

    pub fn with_payment(mut self, payment: Payment) -> Self {
        self.payment_items.get_or_insert_with(Vec::new).push(payment);
        self
    }
}

/// Customer details printed on the fiscal document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomerInfo {
    #[serde(rename = "taxID")]
    pub tax_id: String,
}

/// A single basket line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasketItem {
    pub name: String,
    pub price: i64,
    pub quantity: i64,

    /// Department (section) the item is booked to
    #[serde(rename = "sectionNo")]
    pub section_no: u32,

    #[serde(rename = "taxPercent")]
    pub tax_percent: i64,

    #[serde(rename = "type")]
    pub item_type: i32,
}

impl BasketItem {
    pub fn new(name: impl Into<String>, price: i64, quantity: i64) -> Self {
        Self {
            name: name.into(),
            price,
            quantity,
            section_no: 1,
            tax_percent: 0,
            item_type: 0,
        }
    }

    pub fn with_section(mut self, section_no: u32) -> Self {
        self.section_no = section_no;
        self
    }

    pub fn with_tax_percent(mut self, tax_percent: i64) -> Self {
        self.tax_percent = tax_percent;
        self
    }
}

/// A payment, either standalone (300TR) or embedded in a basket
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub amount: i64,

    #[serde(default)]
    pub description: String,

    #[serde(rename = "type")]
    pub payment_type: i32,
}

impl Payment {
    /// Payment type used by the terminals for cash
    pub const CASH: i32 = 1;

    pub fn cash(amount: i64, description: impl Into<String>) -> Self {
        Self {
            amount,
            description: description.into(),
            payment_type: Self::CASH,
        }
    }
}
