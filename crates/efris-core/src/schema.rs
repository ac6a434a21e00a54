//! Payload schema descriptors
//!
//! Each payload-bearing operation has a static descriptor listing the fields
//! the service recognizes. [`validate`] checks a payload against it and
//! returns a copy holding only declared fields; [`check_response`] runs the
//! same checks over a response but only logs what it finds.

use serde_json::{Map, Value};
use tracing::warn;

use crate::error::{FieldError, ValidationError};

/// Shape constraint for one field
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldKind {
    /// JSON string of at most `max_len` characters
    Text { max_len: usize },
    /// JSON number, or a string holding a finite decimal
    Number,
    /// JSON integer, or a string of ASCII digits
    Integer,
    /// String drawn from a fixed code set
    OneOf(&'static [&'static str]),
    /// Nested object
    Object(&'static [FieldSpec]),
    /// Array of objects
    List(&'static [FieldSpec]),
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FieldSpec {
    /// Wire name
    pub name: &'static str,
    pub kind: FieldKind,
    pub required: bool,
}

/// Descriptor for one interface payload
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Schema {
    pub interface_code: &'static str,
    /// Either [`FieldKind::Object`] or [`FieldKind::List`]
    pub root: FieldKind,
}

const fn req(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: true,
    }
}

const fn opt(name: &'static str, kind: FieldKind) -> FieldSpec {
    FieldSpec {
        name,
        kind,
        required: false,
    }
}

const fn text(max_len: usize) -> FieldKind {
    FieldKind::Text { max_len }
}

const NUM: FieldKind = FieldKind::Number;
const INT: FieldKind = FieldKind::Integer;

const YES_NO_101: FieldKind = FieldKind::OneOf(&["101", "102"]);

// T109 invoice upload

const SELLER_DETAILS: &[FieldSpec] = &[
    req("tin", text(20)),
    opt("ninBrn", text(100)),
    req("legalName", text(256)),
    opt("businessName", text(256)),
    opt("address", text(500)),
    opt("mobilePhone", text(30)),
    opt("linePhone", text(30)),
    opt("emailAddress", text(50)),
    opt("placeOfBusiness", text(500)),
    opt("referenceNo", text(50)),
    opt("branchId", text(18)),
    opt("isCheckReferenceNo", FieldKind::OneOf(&["0", "1"])),
];

const BASIC_INFORMATION: &[FieldSpec] = &[
    opt("invoiceNo", text(20)),
    opt("antifakeCode", text(20)),
    req("deviceNo", text(20)),
    req("issuedDate", text(20)),
    req("operator", text(100)),
    req("currency", text(10)),
    opt("oriInvoiceId", text(20)),
    req("invoiceType", FieldKind::OneOf(&["1", "2", "4", "5"])),
    req("invoiceKind", FieldKind::OneOf(&["1", "2"])),
    req("dataSource", FieldKind::OneOf(&["101", "102", "103", "104", "105", "106", "107"])),
    opt("invoiceIndustryCode", text(3)),
    opt("isBatch", FieldKind::OneOf(&["0", "1"])),
];

const BUYER_DETAILS: &[FieldSpec] = &[
    opt("buyerTin", text(20)),
    opt("buyerNinBrn", text(100)),
    opt("buyerPassportNum", text(20)),
    opt("buyerLegalName", text(256)),
    opt("buyerBusinessName", text(256)),
    opt("buyerAddress", text(500)),
    opt("buyerEmail", text(50)),
    opt("buyerMobilePhone", text(30)),
    opt("buyerLinePhone", text(30)),
    opt("buyerPlaceOfBusi", text(500)),
    req("buyerType", FieldKind::OneOf(&["0", "1", "2", "3"])),
    opt("buyerCitizenship", text(128)),
    opt("buyerSector", text(200)),
    opt("buyerReferenceNo", text(50)),
];

const GOODS_DETAILS: &[FieldSpec] = &[
    req("item", text(200)),
    req("itemCode", text(50)),
    opt("qty", NUM),
    opt("unitOfMeasure", text(3)),
    opt("unitPrice", NUM),
    req("total", NUM),
    req("taxRate", text(10)),
    req("tax", NUM),
    opt("discountTotal", NUM),
    opt("discountTaxRate", text(10)),
    req("orderNumber", INT),
    req("discountFlag", FieldKind::OneOf(&["0", "1", "2"])),
    req("deemedFlag", FieldKind::OneOf(&["1", "2"])),
    req("exciseFlag", FieldKind::OneOf(&["1", "2"])),
    opt("categoryId", text(18)),
    opt("categoryName", text(1024)),
    req("goodsCategoryId", text(18)),
    opt("goodsCategoryName", text(200)),
    opt("exciseRate", text(21)),
    opt("exciseRule", FieldKind::OneOf(&["1", "2"])),
    opt("exciseTax", NUM),
    opt("pack", NUM),
    opt("stick", NUM),
    opt("exciseUnit", text(3)),
    opt("exciseCurrency", text(3)),
    opt("exciseRateName", text(500)),
];

const TAX_DETAILS: &[FieldSpec] = &[
    opt("taxCategoryCode", text(2)),
    req("netAmount", NUM),
    req("taxRate", text(10)),
    req("taxAmount", NUM),
    req("grossAmount", NUM),
    opt("exciseUnit", text(3)),
    opt("exciseCurrency", text(3)),
    opt("taxRateName", text(500)),
];

const SUMMARY: &[FieldSpec] = &[
    req("netAmount", NUM),
    req("taxAmount", NUM),
    req("grossAmount", NUM),
    req("itemCount", INT),
    req("modeCode", FieldKind::OneOf(&["0", "1"])),
    opt("remarks", text(500)),
    opt("qrCode", text(500)),
];

const PAY_WAY: &[FieldSpec] = &[
    req("paymentMode", text(3)),
    req("paymentAmount", NUM),
    req("orderNumber", text(10)),
];

const EXTEND: &[FieldSpec] = &[opt("reason", text(1024)), opt("reasonCode", text(3))];

const INVOICE_UPLOAD: &[FieldSpec] = &[
    req("sellerDetails", FieldKind::Object(SELLER_DETAILS)),
    req("basicInformation", FieldKind::Object(BASIC_INFORMATION)),
    req("buyerDetails", FieldKind::Object(BUYER_DETAILS)),
    req("goodsDetails", FieldKind::List(GOODS_DETAILS)),
    req("taxDetails", FieldKind::List(TAX_DETAILS)),
    req("summary", FieldKind::Object(SUMMARY)),
    opt("payWay", FieldKind::List(PAY_WAY)),
    opt("extend", FieldKind::Object(EXTEND)),
];

// Queries

const INVOICE_QUERY: &[FieldSpec] = &[
    opt("oriInvoiceNo", text(20)),
    opt("invoiceNo", text(20)),
    opt("deviceNo", text(20)),
    opt("buyerTin", text(20)),
    opt("buyerNinBrn", text(100)),
    opt("buyerLegalName", text(256)),
    opt("combineKeywords", text(256)),
    opt("invoiceType", text(1)),
    opt("invoiceKind", text(1)),
    opt("isInvalid", FieldKind::OneOf(&["0", "1"])),
    opt("isRefund", FieldKind::OneOf(&["0", "1", "2", "3"])),
    opt("startDate", text(10)),
    opt("endDate", text(10)),
    req("pageNo", INT),
    req("pageSize", INT),
    opt("referenceNo", text(50)),
    opt("branchName", text(500)),
    opt("queryType", FieldKind::OneOf(&["0", "1"])),
    opt("dataSource", text(3)),
    opt("sellerTinOrNin", text(100)),
    opt("sellerLegalOrBusinessName", text(256)),
];

const TAXPAYER_QUERY: &[FieldSpec] = &[req("tin", text(20)), opt("ninBrn", text(100))];

const EXCHANGE_RATE_QUERY: &[FieldSpec] = &[req("currency", text(3)), opt("issueDate", text(10))];

const GOODS_INQUIRY: &[FieldSpec] = &[
    opt("goodsCode", text(50)),
    opt("goodsName", text(200)),
    opt("commodityCategoryName", text(200)),
    req("pageNo", INT),
    req("pageSize", INT),
    opt("branchId", text(18)),
    opt("serviceMark", YES_NO_101),
    opt("haveExciseTax", YES_NO_101),
    opt("startDate", text(10)),
    opt("endDate", text(10)),
    opt("combineKeywords", text(200)),
    opt("goodsTypeCode", text(3)),
];

// Goods and stock

const GOODS_OTHER_UNITS: &[FieldSpec] = &[
    req("otherUnit", text(3)),
    req("otherPrice", NUM),
    req("otherScaled", NUM),
    req("packageScaled", NUM),
];

const GOODS_UPLOAD: &[FieldSpec] = &[
    req("operationType", YES_NO_101),
    req("goodsName", text(200)),
    req("goodsCode", text(50)),
    req("measureUnit", text(3)),
    req("unitPrice", NUM),
    req("currency", text(3)),
    req("commodityCategoryId", text(18)),
    req("haveExciseTax", YES_NO_101),
    opt("description", text(1024)),
    req("stockPrewarning", NUM),
    opt("pieceMeasureUnit", text(3)),
    opt("havePieceUnit", YES_NO_101),
    opt("pieceUnitPrice", NUM),
    opt("packageScaledValue", NUM),
    opt("pieceScaledValue", NUM),
    opt("exciseDutyCode", text(20)),
    opt("haveOtherUnit", YES_NO_101),
    opt("goodsTypeCode", text(3)),
    opt("goodsOtherUnits", FieldKind::List(GOODS_OTHER_UNITS)),
];

const STOCK_IN: &[FieldSpec] = &[
    req("operationType", YES_NO_101),
    opt("supplierTin", text(20)),
    opt("supplierName", text(256)),
    opt("adjustType", text(3)),
    opt("remarks", text(1024)),
    opt("stockInDate", text(10)),
    opt("stockInType", text(3)),
    opt("productionBatchNo", text(50)),
    opt("productionDate", text(10)),
    opt("branchId", text(18)),
    opt("invoiceNo", text(20)),
    opt("isCheckBatchNo", FieldKind::OneOf(&["0", "1"])),
    opt("rollBackIfError", FieldKind::OneOf(&["0", "1"])),
    opt("goodsTypeCode", text(3)),
];

const STOCK_IN_ITEM: &[FieldSpec] = &[
    opt("commodityGoodsId", text(18)),
    opt("goodsCode", text(50)),
    opt("measureUnit", text(3)),
    req("quantity", NUM),
    req("unitPrice", NUM),
    opt("remarks", text(1024)),
    opt("fuelTankId", text(18)),
    opt("lossQuantity", NUM),
    opt("originalQuantity", NUM),
];

const STOCK_MAINTAIN: &[FieldSpec] = &[
    req("goodsStockIn", FieldKind::Object(STOCK_IN)),
    req("goodsStockInItem", FieldKind::List(STOCK_IN_ITEM)),
];

static REQUEST_SCHEMAS: &[Schema] = &[
    Schema {
        interface_code: "T106",
        root: FieldKind::Object(INVOICE_QUERY),
    },
    Schema {
        interface_code: "T109",
        root: FieldKind::Object(INVOICE_UPLOAD),
    },
    Schema {
        interface_code: "T119",
        root: FieldKind::Object(TAXPAYER_QUERY),
    },
    Schema {
        interface_code: "T121",
        root: FieldKind::Object(EXCHANGE_RATE_QUERY),
    },
    Schema {
        interface_code: "T127",
        root: FieldKind::Object(GOODS_INQUIRY),
    },
    Schema {
        interface_code: "T130",
        root: FieldKind::List(GOODS_UPLOAD),
    },
    Schema {
        interface_code: "T131",
        root: FieldKind::Object(STOCK_MAINTAIN),
    },
];

// Responses

const SERVER_TIME_RESPONSE: &[FieldSpec] = &[req("currentTime", text(19))];

const TAXPAYER: &[FieldSpec] = &[
    req("tin", text(20)),
    opt("ninBrn", text(100)),
    req("legalName", text(256)),
    opt("businessName", text(256)),
    opt("taxpayerStatus", text(3)),
    opt("taxpayerType", text(3)),
];

const TAXPAYER_RESPONSE: &[FieldSpec] = &[req("taxpayer", FieldKind::Object(TAXPAYER))];

const EXCHANGE_RATE_RESPONSE: &[FieldSpec] = &[req("currency", text(3)), req("rate", NUM)];

static RESPONSE_SCHEMAS: &[Schema] = &[
    Schema {
        interface_code: "T101",
        root: FieldKind::Object(SERVER_TIME_RESPONSE),
    },
    Schema {
        interface_code: "T119",
        root: FieldKind::Object(TAXPAYER_RESPONSE),
    },
    Schema {
        interface_code: "T121",
        root: FieldKind::Object(EXCHANGE_RATE_RESPONSE),
    },
];

/// Request descriptor for an interface code
pub fn request_schema(interface_code: &str) -> Option<&'static Schema> {
    REQUEST_SCHEMAS
        .iter()
        .find(|s| s.interface_code == interface_code)
}

/// Response descriptor for an interface code
pub fn response_schema(interface_code: &str) -> Option<&'static Schema> {
    RESPONSE_SCHEMAS
        .iter()
        .find(|s| s.interface_code == interface_code)
}

/// Validate a request payload and strip undeclared fields.
///
/// Codes without a descriptor pass through unchanged. Every field error is
/// collected before failing.
pub fn validate(interface_code: &str, payload: &Value) -> Result<Value, ValidationError> {
    let Some(schema) = request_schema(interface_code) else {
        return Ok(payload.clone());
    };

    let mut errors = Vec::new();
    match check(&schema.root, payload, "", &mut errors) {
        Some(filtered) if errors.is_empty() => Ok(filtered),
        _ => Err(ValidationError {
            interface_code: interface_code.to_string(),
            errors,
        }),
    }
}

/// Soft check of a response body. Problems are logged, never raised.
pub fn check_response(interface_code: &str, content: &Value) -> bool {
    let Some(schema) = response_schema(interface_code) else {
        return true;
    };

    let mut errors = Vec::new();
    check(&schema.root, content, "", &mut errors);
    if errors.is_empty() {
        return true;
    }

    let err = ValidationError {
        interface_code: interface_code.to_string(),
        errors,
    };
    warn!(interface_code, "Unexpected response shape: {}", err);
    false
}

fn child_path(parent: &str, name: &str) -> String {
    if parent.is_empty() {
        name.to_string()
    } else {
        format!("{}.{}", parent, name)
    }
}

fn reject(errors: &mut Vec<FieldError>, path: &str, reason: impl Into<String>) -> Option<Value> {
    errors.push(FieldError {
        path: if path.is_empty() { "$".to_string() } else { path.to_string() },
        reason: reason.into(),
    });
    None
}

fn check(kind: &FieldKind, value: &Value, path: &str, errors: &mut Vec<FieldError>) -> Option<Value> {
    match kind {
        FieldKind::Text { max_len } => match value {
            Value::String(s) if s.chars().count() <= *max_len => Some(value.clone()),
            Value::String(_) => reject(errors, path, format!("longer than {} characters", max_len)),
            _ => reject(errors, path, "expected string"),
        },
        FieldKind::Number => {
            let ok = match value {
                Value::Number(_) => true,
                Value::String(s) => s.trim().parse::<f64>().map_or(false, f64::is_finite),
                _ => false,
            };
            if ok {
                Some(value.clone())
            } else {
                reject(errors, path, "expected number")
            }
        }
        FieldKind::Integer => {
            let ok = match value {
                Value::Number(n) => n.is_i64() || n.is_u64(),
                Value::String(s) => !s.is_empty() && s.bytes().all(|b| b.is_ascii_digit()),
                _ => false,
            };
            if ok {
                Some(value.clone())
            } else {
                reject(errors, path, "expected integer")
            }
        }
        FieldKind::OneOf(allowed) => match value {
            Value::String(s) if allowed.contains(&s.as_str()) => Some(value.clone()),
            _ => reject(errors, path, format!("expected one of {}", allowed.join(", "))),
        },
        FieldKind::Object(fields) => match value {
            Value::Object(map) => check_object(fields, map, path, errors),
            _ => reject(errors, path, "expected object"),
        },
        FieldKind::List(fields) => match value {
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{}[{}]", path, i);
                    let checked = match item {
                        Value::Object(map) => check_object(fields, map, &item_path, errors),
                        _ => reject(errors, &item_path, "expected object"),
                    };
                    if let Some(checked) = checked {
                        out.push(checked);
                    }
                }
                Some(Value::Array(out))
            }
            _ => reject(errors, path, "expected array"),
        },
    }
}

fn check_object(
    fields: &[FieldSpec],
    map: &Map<String, Value>,
    path: &str,
    errors: &mut Vec<FieldError>,
) -> Option<Value> {
    let mut out = Map::new();
    for field in fields {
        let field_path = child_path(path, field.name);
        match map.get(field.name) {
            None | Some(Value::Null) => {
                if field.required {
                    reject(errors, &field_path, "required");
                }
            }
            Some(Value::String(s)) if s.is_empty() && field.required => {
                reject(errors, &field_path, "required");
            }
            Some(value) => {
                if let Some(checked) = check(&field.kind, value, &field_path, errors) {
                    out.insert(field.name.to_string(), checked);
                }
            }
        }
    }
    Some(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn invoice() -> Value {
        json!({
            "sellerDetails": { "tin": "1000000000", "legalName": "Acme Ltd" },
            "basicInformation": {
                "deviceNo": "TCS0001",
                "issuedDate": "2024-03-01 10:00:00",
                "operator": "admin",
                "currency": "UGX",
                "invoiceType": "1",
                "invoiceKind": "1",
                "dataSource": "103"
            },
            "buyerDetails": { "buyerType": "1", "buyerLegalName": "Jane" },
            "goodsDetails": [{
                "item": "Sugar",
                "itemCode": "SUG-1",
                "qty": "2",
                "unitPrice": "5000",
                "total": "10000",
                "taxRate": "0.18",
                "tax": "1525.42",
                "orderNumber": "0",
                "discountFlag": "2",
                "deemedFlag": "2",
                "exciseFlag": "2",
                "goodsCategoryId": "50202306"
            }],
            "taxDetails": [{
                "taxCategoryCode": "01",
                "netAmount": "8474.58",
                "taxRate": "0.18",
                "taxAmount": "1525.42",
                "grossAmount": "10000"
            }],
            "summary": {
                "netAmount": 8474.58,
                "taxAmount": 1525.42,
                "grossAmount": 10000,
                "itemCount": 1,
                "modeCode": "1"
            }
        })
    }

    #[test]
    fn test_valid_invoice_passes() {
        let filtered = validate("T109", &invoice()).unwrap();
        assert_eq!(filtered["sellerDetails"]["tin"], "1000000000");
        assert_eq!(filtered["goodsDetails"][0]["item"], "Sugar");
    }

    #[test]
    fn test_undeclared_fields_are_stripped() {
        let mut payload = invoice();
        payload["internalNote"] = json!("do not send");
        payload["summary"]["debug"] = json!(true);

        let filtered = validate("T109", &payload).unwrap();
        assert!(filtered.get("internalNote").is_none());
        assert!(filtered["summary"].get("debug").is_none());
    }

    #[test]
    fn test_all_errors_are_collected() {
        let mut payload = invoice();
        payload["sellerDetails"]["tin"] = json!("");
        payload["summary"]["grossAmount"] = json!("ten thousand");
        payload["goodsDetails"][0]["deemedFlag"] = json!("9");

        let err = validate("T109", &payload).unwrap_err();
        let paths: Vec<_> = err.errors.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(err.interface_code, "T109");
        assert!(paths.contains(&"sellerDetails.tin"));
        assert!(paths.contains(&"summary.grossAmount"));
        assert!(paths.contains(&"goodsDetails[0].deemedFlag"));
        assert_eq!(err.errors.len(), 3);
    }

    #[test]
    fn test_max_length() {
        let err = validate("T119", &json!({ "tin": "1".repeat(21) })).unwrap_err();
        assert_eq!(err.errors[0].path, "tin");
        assert!(err.errors[0].reason.contains("20"));
    }

    #[test]
    fn test_list_root() {
        let goods = json!([{
            "operationType": "101",
            "goodsName": "Sugar",
            "goodsCode": "SUG-1",
            "measureUnit": "KGM",
            "unitPrice": "5000",
            "currency": "101",
            "commodityCategoryId": "50202306",
            "haveExciseTax": "102",
            "stockPrewarning": "10"
        }]);
        assert!(validate("T130", &goods).is_ok());

        let err = validate("T130", &json!({ "goodsName": "Sugar" })).unwrap_err();
        assert_eq!(err.errors[0].path, "$");
    }

    #[test]
    fn test_unknown_code_passes_through() {
        let payload = json!({ "anything": [1, 2, 3] });
        assert_eq!(validate("T999", &payload).unwrap(), payload);
    }

    #[test]
    fn test_response_check_is_soft() {
        assert!(check_response("T101", &json!({ "currentTime": "01/03/2024 10:00:00" })));
        assert!(!check_response("T101", &json!({ "time": 1 })));
        assert!(check_response("T131", &json!(null)));
    }
}
