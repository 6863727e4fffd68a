use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

use crate::models::{InvoiceExtraction, LineItem};
use crate::utils::{now_iso_local, parse_decimal, parse_dmy_date};

pub const UNKNOWN: &str = "Unknown";
pub const UNKNOWN_ITEM: &str = "Unknown item";
pub const DEFAULT_STATUS: &str = "PENDING";

const DATE: &str = r"(\d{1,2}[-/]\d{1,2}[-/]\d{2,4})";
const AMOUNT: &str = r"[$€£]?\s*(\d+[.,]\d{2})";

fn compile(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .map(|p| Regex::new(p).expect("Invalid extractor pattern"))
        .collect()
}

fn labelled(labels: &[&str], capture: &str) -> Vec<Regex> {
    let patterns: Vec<String> = labels
        .iter()
        .map(|label| format!(r"(?i){}\s*:?\s*{}", label, capture))
        .collect();
    compile(&patterns)
}

static INVOICE_NUMBER: Lazy<Vec<Regex>> = Lazy::new(|| {
    compile(&[
        r"(?i)Invoice\s*#?\s*(\d+)".to_string(),
        r"(?i)Invoice\s*Number\s*:?\s*(\d+)".to_string(),
        r"(?i)Invoice\s*ID\s*:?\s*(\d+)".to_string(),
    ])
});
static INVOICE_DATE: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Date", r"Invoice\s*Date"], DATE));
static DUE_DATE: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Due\s*Date", r"Payment\s*Due"], DATE));
static TOTAL: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Total", r"Amount\s*Due"], AMOUNT));
static TAX: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Tax", r"VAT"], AMOUNT));
static CLIENT_ID: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Client\s*ID", r"Customer\s*ID"], r"(\w+)"));
static PROJECT_ID: Lazy<Vec<Regex>> =
    Lazy::new(|| labelled(&[r"Project\s*ID", r"Project\s*Number"], r"(\w+)"));
static DESCRIPTION: Lazy<Vec<Regex>> = Lazy::new(|| labelled(&[r"Description", r"Details"], r"([^\n]+)"));

// Line-item patterns are case-sensitive: the quantity marker is a lowercase `x`.
static ITEM_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+\s*x\s*[$€£]?\s*\d+[.,]\d{2}").expect("Invalid item pattern"));
static ITEM_QUANTITY: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\s*x").expect("Invalid item pattern"));
static ITEM_PRICE: Lazy<Regex> = Lazy::new(|| Regex::new(AMOUNT).expect("Invalid item pattern"));
static ITEM_DESCRIPTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"([a-zA-Z].+?)\s+\d+\s*x").expect("Invalid item pattern"));

pub struct InvoiceFieldExtractor;

impl InvoiceFieldExtractor {
    pub fn extract(text: &str) -> InvoiceExtraction {
        let extraction = InvoiceExtraction {
            invoice_number: extract_invoice_number(text),
            date: extract_date(text),
            due_date: extract_due_date(text),
            total_amount: extract_total_amount(text),
            tax_amount: extract_tax_amount(text),
            status: DEFAULT_STATUS.to_string(),
            client_id: extract_client_id(text),
            project_id: extract_project_id(text),
            description: extract_description(text),
            items: extract_items(text),
        };
        debug!(
            invoice_number = %extraction.invoice_number,
            items = extraction.items.len(),
            "Extracted invoice fields"
        );
        extraction
    }
}

/// First capture of the first pattern that matches, in list order.
fn first_capture(patterns: &[Regex], text: &str) -> Option<String> {
    patterns
        .iter()
        .find_map(|re| re.captures(text).and_then(|c| c.get(1)).map(|m| m.as_str().to_string()))
}

/// Like `first_capture`, but a capture that fails `parse` falls through to the next pattern.
fn first_parsed<T>(patterns: &[Regex], text: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
    patterns.iter().find_map(|re| {
        let captured = re.captures(text)?.get(1)?;
        parse(captured.as_str())
    })
}

pub fn extract_invoice_number(text: &str) -> String {
    first_capture(&INVOICE_NUMBER, text).unwrap_or_else(|| UNKNOWN.to_string())
}

pub fn extract_date(text: &str) -> String {
    first_parsed(&INVOICE_DATE, text, parse_dmy_date).unwrap_or_else(now_iso_local)
}

pub fn extract_due_date(text: &str) -> Option<String> {
    first_parsed(&DUE_DATE, text, parse_dmy_date)
}

pub fn extract_total_amount(text: &str) -> f64 {
    first_parsed(&TOTAL, text, |raw| parse_decimal(raw).ok()).unwrap_or(0.0)
}

pub fn extract_tax_amount(text: &str) -> f64 {
    first_parsed(&TAX, text, |raw| parse_decimal(raw).ok()).unwrap_or(0.0)
}

pub fn extract_client_id(text: &str) -> String {
    first_capture(&CLIENT_ID, text).unwrap_or_else(|| UNKNOWN.to_string())
}

pub fn extract_project_id(text: &str) -> Option<String> {
    first_capture(&PROJECT_ID, text)
}

pub fn extract_description(text: &str) -> Option<String> {
    first_capture(&DESCRIPTION, text).map(|d| d.trim().to_string())
}

pub fn extract_items(text: &str) -> Vec<LineItem> {
    let mut items = Vec::new();
    let mut pending: Option<LineItem> = None;

    for line in text.split('\n') {
        if !ITEM_LINE.is_match(line) {
            continue;
        }
        if let Some(item) = pending.take() {
            items.push(item);
        }
        pending = parse_item_line(line);
    }

    if let Some(item) = pending {
        items.push(item);
    }
    items
}

fn parse_item_line(line: &str) -> Option<LineItem> {
    let quantity: u64 = ITEM_QUANTITY.captures(line)?.get(1)?.as_str().parse().ok()?;
    let unit_price = parse_decimal(ITEM_PRICE.captures(line)?.get(1)?.as_str()).ok()?;
    let description = ITEM_DESCRIPTION
        .captures(line)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .unwrap_or_else(|| UNKNOWN_ITEM.to_string());

    Some(LineItem {
        description,
        quantity,
        unit_price,
        total_price: unit_price * quantity as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "ACME Corp\n\
        Invoice Number: 20240117\n\
        Invoice Date: 17/01/2024\n\
        Due Date: 16/02/2024\n\
        Client ID: CL042\n\
        Project Number: PRJ7\n\
        Description: Website redesign, phase 1\n\
        Consulting 3 x $150.00\n\
        Hosting 1 x $20,50\n\
        Tax: $94,10\n\
        Total: $564,60\n";

    #[test]
    fn invoice_number_defaults_to_unknown() {
        assert_eq!(extract_invoice_number("Receipt 42\nThank you"), UNKNOWN);
        assert_eq!(extract_invoice_number(""), UNKNOWN);
    }

    #[test]
    fn invoice_number_patterns() {
        assert_eq!(extract_invoice_number("Invoice #123"), "123");
        assert_eq!(extract_invoice_number("INVOICE NUMBER: 987"), "987");
        assert_eq!(extract_invoice_number("invoice id 55"), "55");
    }

    #[test]
    fn total_normalizes_comma() {
        assert_eq!(extract_total_amount("Total: $123,45"), 123.45);
        assert_eq!(extract_total_amount("Amount Due €99.90"), 99.90);
        assert_eq!(extract_total_amount("nothing here"), 0.0);
    }

    #[test]
    fn tax_falls_back_to_vat() {
        assert_eq!(extract_tax_amount("VAT: £19,00"), 19.0);
        assert_eq!(extract_tax_amount("no amounts"), 0.0);
    }

    #[test]
    fn single_line_item() {
        let items = extract_items("2 x $10.00 Widget");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 2);
        assert_eq!(items[0].unit_price, 10.00);
        assert_eq!(items[0].total_price, 20.00);
        // Text after the price is not a description.
        assert_eq!(items[0].description, UNKNOWN_ITEM);
    }

    #[test]
    fn line_items_keep_order_and_description() {
        let items = extract_items(SAMPLE);
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].description, "Consulting");
        assert_eq!(items[0].total_price, 450.0);
        assert_eq!(items[1].description, "Hosting");
        assert_eq!(items[1].unit_price, 20.5);
    }

    #[test]
    fn unparsable_date_falls_through_to_next_pattern() {
        // First pattern hits the dashed date, which the strict parse rejects.
        let text = "Date: 05-06-2024\nInvoice Date: 07/08/2024";
        assert_eq!(extract_date(text), "2024-08-07T00:00:00");
    }

    #[test]
    fn two_digit_year_is_not_a_date() {
        let date = extract_date("Date: 05/06/24");
        assert!(!date.starts_with("0024"));
        let parsed = chrono::NaiveDateTime::parse_from_str(&date, "%Y-%m-%dT%H:%M:%S%.f").unwrap();
        assert!(chrono::Datelike::year(&parsed) >= 2024);

        assert_eq!(extract_due_date("Due Date: 05/06/202"), None);
        assert_eq!(extract_due_date("Due Date: 05/06/24"), None);
    }

    #[test]
    fn large_quantities_keep_the_item() {
        let items = extract_items("Bolts 99999999999 x $1.00");
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].quantity, 99_999_999_999);
        assert_eq!(items[0].description, "Bolts");
        assert_eq!(items[0].total_price, 99_999_999_999.0);
    }

    #[test]
    fn missing_dates_default() {
        let date = extract_date("no dates at all");
        assert!(chrono::NaiveDateTime::parse_from_str(&date, "%Y-%m-%dT%H:%M:%S%.f").is_ok());
        assert_eq!(extract_due_date("no dates at all"), None);
    }

    #[test]
    fn label_overlap_resolves_by_pattern_order() {
        // "Date" also matches inside "Due Date", and wins because it is listed first.
        let text = "Due Date: 01/03/2024\nInvoice Date: 01/02/2024";
        assert_eq!(extract_date(text), "2024-03-01T00:00:00");
    }

    #[test]
    fn full_extraction() {
        let extraction = InvoiceFieldExtractor::extract(SAMPLE);
        assert_eq!(extraction.invoice_number, "20240117");
        assert_eq!(extraction.date, "2024-01-17T00:00:00");
        assert_eq!(extraction.due_date.as_deref(), Some("2024-02-16T00:00:00"));
        assert_eq!(extraction.client_id, "CL042");
        assert_eq!(extraction.project_id.as_deref(), Some("PRJ7"));
        assert_eq!(extraction.description.as_deref(), Some("Website redesign, phase 1"));
        assert_eq!(extraction.tax_amount, 94.10);
        assert_eq!(extraction.total_amount, 564.60);
        assert_eq!(extraction.status, DEFAULT_STATUS);
    }

    #[test]
    fn empty_text_yields_defaults() {
        let extraction = InvoiceFieldExtractor::extract("");
        assert_eq!(extraction.invoice_number, UNKNOWN);
        assert_eq!(extraction.client_id, UNKNOWN);
        assert_eq!(extraction.project_id, None);
        assert_eq!(extraction.description, None);
        assert_eq!(extraction.total_amount, 0.0);
        assert!(extraction.items.is_empty());
    }

    #[test]
    fn serializes_camel_case() {
        let value = serde_json::to_value(InvoiceFieldExtractor::extract("2 x 1.00")).unwrap();
        assert!(value.get("invoiceNumber").is_some());
        assert!(value.get("dueDate").unwrap().is_null());
        assert_eq!(value["items"][0]["unitPrice"], 1.0);
    }
}
