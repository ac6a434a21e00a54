//! Interface registry
//!
//! Static mapping from operation keys to the service's interface codes.
//! Lookups never allocate; an unknown key is a caller error, not a network
//! condition.

/// One remote operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interface {
    /// Human-readable operation key, e.g. `billing_upload`
    pub key: &'static str,
    /// Four-character interface code, e.g. `T109`
    pub code: &'static str,
    /// Whether payloads are normally exchanged AES-encrypted
    pub encrypted: bool,
    pub description: &'static str,
}

pub const SERVER_TIME: &str = "get_server_time";
pub const CLIENT_INIT: &str = "client_init";
pub const SIGN_IN: &str = "sign_in";
pub const GET_SYMMETRIC_KEY: &str = "get_symmetric_key";
pub const INVOICE_QUERY: &str = "invoice_query";
pub const BILLING_UPLOAD: &str = "billing_upload";
pub const QUERY_TAXPAYER: &str = "query_taxpayer_by_tin";
pub const EXCHANGE_RATE: &str = "get_exchange_rate";
pub const GOODS_INQUIRY: &str = "goods_inquiry";
pub const GOODS_UPLOAD: &str = "goods_upload";
pub const STOCK_MAINTAIN: &str = "stock_maintain";

const fn plain(key: &'static str, code: &'static str, description: &'static str) -> Interface {
    Interface {
        key,
        code,
        encrypted: false,
        description,
    }
}

const fn sealed(key: &'static str, code: &'static str, description: &'static str) -> Interface {
    Interface {
        key,
        code,
        encrypted: true,
        description,
    }
}

static INTERFACES: &[Interface] = &[
    // Handshake
    plain(SERVER_TIME, "T101", "Get server time"),
    plain(CLIENT_INIT, "T102", "Client initialization"),
    plain(SIGN_IN, "T103", "Sign in"),
    plain(GET_SYMMETRIC_KEY, "T104", "Get symmetric key and signature"),
    sealed("forget_password", "T105", "Forget password"),
    // Invoices
    sealed(INVOICE_QUERY, "T106", "Invoice/receipt query"),
    sealed("query_normal_invoices", "T107", "Query normal invoice/receipt"),
    sealed("invoice_detail", "T108", "Invoice details"),
    sealed(BILLING_UPLOAD, "T109", "Billing upload"),
    sealed("credit_note_apply", "T110", "Credit note application"),
    sealed("credit_note_query", "T111", "Credit/debit note application list query"),
    sealed("credit_note_detail", "T112", "Credit note application detail"),
    sealed("credit_note_approve", "T113", "Credit note approval"),
    sealed("credit_note_cancel", "T114", "Cancel credit/debit note application"),
    sealed("system_dictionary", "T115", "System dictionary update"),
    sealed("z_report_upload", "T116", "Z-report daily upload"),
    sealed("invoice_checks", "T117", "Invoice checks"),
    sealed("credit_application_detail", "T118", "Query credit note application details"),
    sealed(QUERY_TAXPAYER, "T119", "Query taxpayer information by TIN"),
    sealed("void_credit_application", "T120", "Void credit/debit note application"),
    sealed(EXCHANGE_RATE, "T121", "Acquire exchange rate"),
    sealed("query_cancel_credit_note", "T122", "Query cancel credit note invoice"),
    // Goods and stock
    sealed("commodity_category", "T123", "Query commodity category"),
    sealed("commodity_category_page", "T124", "Query commodity category pagination"),
    sealed("excise_duty", "T125", "Query excise duty"),
    sealed("all_exchange_rates", "T126", "Get all exchange rates"),
    sealed(GOODS_INQUIRY, "T127", "Goods/services inquiry"),
    sealed("stock_quantity", "T128", "Query stock quantity by goods id"),
    sealed("batch_invoice_upload", "T129", "Batch invoice upload"),
    sealed(GOODS_UPLOAD, "T130", "Goods upload"),
    sealed(STOCK_MAINTAIN, "T131", "Goods stock maintain"),
    sealed("exception_log_upload", "T132", "Upload exception logs"),
    sealed("tcs_upgrade_download", "T133", "TCS upgrade system file download"),
    sealed("commodity_category_update", "T134", "Commodity category incremental update"),
    sealed("tcs_version", "T135", "Get TCS latest version"),
    sealed("certificate_upload", "T136", "Certificate public key upload"),
    sealed("check_exempt_taxpayer", "T137", "Check exempt/deemed taxpayer"),
    sealed("branches", "T138", "Get all branches"),
    sealed("stock_transfer", "T139", "Goods stock transfer"),
    sealed("goods_by_code", "T144", "Query goods by code"),
    sealed("stock_records", "T145", "Goods stock records query"),
    sealed("stock_records_alt", "T147", "Goods stock records query (alternate)"),
    sealed("stock_record_detail", "T148", "Goods stock record detail"),
    sealed("stock_adjust_records", "T149", "Query goods stock adjustment records"),
    sealed("stock_adjust_detail", "T160", "Goods stock adjustment detail"),
    // EDC and fuel
    sealed("fuel_types", "T162", "Query fuel type"),
    sealed("shift_upload", "T163", "Upload shift information"),
    sealed("edc_disconnect_upload", "T164", "Upload EDC disconnection data"),
    sealed("update_buyer", "T166", "Update buyer details"),
    sealed("edc_invoice_query", "T167", "EDC invoice/receipt inquiry"),
    sealed("fuel_pump_version", "T168", "Query fuel pump version"),
    sealed("fuel_equipment", "T169", "Query pump, nozzle and tank by pump id"),
    sealed("edc_location", "T170", "Query EDC location"),
    sealed("edc_uom_rate", "T171", "Query EDC unit of measure exchange rate"),
    sealed("nozzle_status_upload", "T172", "Upload fuel nozzle status"),
    sealed("edc_device_version", "T173", "Query EDC device version"),
    // Accounts and agents
    sealed("ussd_account_create", "T175", "Account creation for USSD taxpayer"),
    sealed("device_status_upload", "T176", "Upload device issuing status"),
    sealed("negative_stock_config", "T177", "Negative stock configuration"),
    sealed("efd_transfer", "T178", "EFD transfer"),
    sealed("agent_relations", "T179", "Query agent relation information"),
    sealed("principal_agent", "T180", "Query principal agent TIN information"),
    sealed("frequent_contacts_upload", "T181", "Upload frequent contacts"),
    sealed("frequent_contacts", "T182", "Get frequent contacts"),
    sealed("hs_code_upload", "T183", "Upload HS code list"),
    sealed("invoice_remain_detail", "T184", "Invoice remain details"),
    sealed("hs_codes", "T185", "Query HS codes"),
];

/// Resolve an operation key
pub fn lookup(key: &str) -> Option<&'static Interface> {
    INTERFACES.iter().find(|i| i.key == key)
}

/// Interface code for an operation key
pub fn interface_code(key: &str) -> Option<&'static str> {
    lookup(key).map(|i| i.code)
}

/// Reverse lookup by interface code
pub fn by_code(code: &str) -> Option<&'static Interface> {
    INTERFACES.iter().find(|i| i.code == code)
}

/// Every registered operation, in code order
pub fn all() -> &'static [Interface] {
    INTERFACES
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_known_keys() {
        assert_eq!(interface_code(SIGN_IN), Some("T103"));
        assert_eq!(interface_code(BILLING_UPLOAD), Some("T109"));
        assert_eq!(interface_code(GET_SYMMETRIC_KEY), Some("T104"));
        assert_eq!(interface_code("not_a_real_operation"), None);
    }

    #[test]
    fn test_reverse_lookup() {
        let iface = by_code("T119").unwrap();
        assert_eq!(iface.key, QUERY_TAXPAYER);
        assert!(iface.encrypted);
        assert!(by_code("T999").is_none());
    }

    #[test]
    fn test_handshake_is_plain() {
        for key in [SERVER_TIME, CLIENT_INIT, SIGN_IN, GET_SYMMETRIC_KEY] {
            assert!(!lookup(key).unwrap().encrypted, "{} should be plain", key);
        }
    }

    #[test]
    fn test_table_is_well_formed() {
        let mut keys = HashSet::new();
        let mut codes = HashSet::new();
        for iface in all() {
            assert!(keys.insert(iface.key), "duplicate key {}", iface.key);
            assert!(codes.insert(iface.code), "duplicate code {}", iface.code);
            assert_eq!(iface.code.len(), 4);
            assert!(iface.code.starts_with('T'));
            assert!(iface.code[1..].chars().all(|c| c.is_ascii_digit()));
        }
        assert!(all().windows(2).all(|w| w[0].code < w[1].code));
    }
}
