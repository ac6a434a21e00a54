//! Wire envelope for the `getInformation` endpoint
//!
//! Every request and response is one JSON document:
//!
//! ```text
//! {
//!   "data":            { "content", "signature", "dataDescription" },
//!   "globalInfo":      { interface code, caller identity, timestamps, ... },
//!   "returnStateInfo": { "returnCode", "returnMessage" }
//! }
//! ```
//!
//! `dataDescription` carries three string flags:
//!
//! | field         | values                               |
//! |---------------|--------------------------------------|
//! | `codeType`    | `0` plain Base64, `1` binary framed  |
//! | `encryptCode` | `1` plaintext, `2` AES encrypted     |
//! | `zipCode`     | `0` raw, `1` gzip                    |

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rsa::RsaPrivateKey;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::crypto;
use crate::error::{Error, Result};
use crate::time::TimeSource;

/// Application identifier expected by the service
pub const APP_ID: &str = "AP04";

/// Protocol version string
pub const PROTOCOL_VERSION: &str = "1.1.20191201";

/// Direction marker on requests
pub const REQUEST_CODE: &str = "TP";

/// Direction marker expected on responses
pub const RESPONSE_CODE: &str = "TA";

/// Fixed user name sent by integrating systems
pub const USER_NAME: &str = "admin";

/// Placeholder MAC address
pub const DEVICE_MAC: &str = "FFFFFFFFFFFF";

/// Agent type for a taxpayer acting on its own behalf
pub const AGENT_TYPE: &str = "0";

/// Static geolocation placeholders (Kampala)
pub const LONGITUDE: &str = "32.5825";
pub const LATITUDE: &str = "0.3476";

/// Response formatting hints sent in the extension block
pub const RESPONSE_DATE_FORMAT: &str = "dd/MM/yyyy";
pub const RESPONSE_TIME_FORMAT: &str = "dd/MM/yyyy HH:mm:ss";

/// Return code the service uses for success
pub const SUCCESS_RETURN_CODE: &str = "00";

/// Who is calling: the taxpayer and registered device
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// Tax identification number
    pub tin: String,
    /// Registered device number
    pub device_no: String,
    /// Business registration number
    pub brn: String,
    pub taxpayer_id: String,
    pub operator_name: String,
}

/// Full request envelope
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub data: EnvelopeData,
    pub global_info: GlobalInfo,
    pub return_state_info: ReturnStateInfo,
}

/// Payload block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnvelopeData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub signature: String,
    #[serde(default)]
    pub data_description: DataDescription,
}

/// Content framing flags
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataDescription {
    #[serde(default, deserialize_with = "lenient_string")]
    pub code_type: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub encrypt_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub zip_code: String,
}

impl Default for DataDescription {
    fn default() -> Self {
        Self::plain()
    }
}

impl DataDescription {
    /// Plain Base64 JSON content
    pub fn plain() -> Self {
        Self {
            code_type: "0".to_string(),
            encrypt_code: "1".to_string(),
            zip_code: "0".to_string(),
        }
    }

    /// AES-encrypted Base64 content
    pub fn encrypted() -> Self {
        Self {
            code_type: "1".to_string(),
            encrypt_code: "2".to_string(),
            zip_code: "0".to_string(),
        }
    }

    pub fn is_binary_framed(&self) -> bool {
        self.code_type == "1"
    }

    pub fn is_encrypted(&self) -> bool {
        self.encrypt_code == "2"
    }

    pub fn is_compressed(&self) -> bool {
        self.zip_code == "1"
    }
}

/// Metadata block
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalInfo {
    pub app_id: String,
    pub version: String,
    /// Correlation id, 32 uppercase hex characters
    pub data_exchange_id: String,
    pub interface_code: String,
    pub request_code: String,
    pub request_time: String,
    pub response_code: String,
    pub user_name: String,
    #[serde(rename = "deviceMAC")]
    pub device_mac: String,
    pub device_no: String,
    pub tin: String,
    pub brn: String,
    #[serde(rename = "taxpayerID")]
    pub taxpayer_id: String,
    pub longitude: String,
    pub latitude: String,
    pub agent_type: String,
    pub extend_field: ExtendField,
}

/// Extension block with response formatting hints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendField {
    pub response_date_format: String,
    pub response_time_format: String,
    pub reference_no: String,
    pub operator_name: String,
}

/// Status block, filled in by the service
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnStateInfo {
    #[serde(default, deserialize_with = "lenient_string")]
    pub return_code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pub return_message: String,
}

impl ReturnStateInfo {
    pub fn is_success(&self) -> bool {
        self.return_code == SUCCESS_RETURN_CODE
    }
}

/// Accept strings, numbers, and null where the service is inconsistent
fn lenient_string<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s,
        Some(other) => other.to_string(),
    })
}

/// Decoded response content
#[derive(Debug, Clone, PartialEq)]
pub enum Content {
    /// The service sent no content
    Empty,
    /// Content decoded to a JSON document
    Json(Value),
    /// Content decoded but was not JSON
    Text(String),
    /// Content decoded to bytes that are not UTF-8
    Binary(Vec<u8>),
}

impl Content {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Content::Json(value) => Some(value),
            _ => None,
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Content::Empty)
    }
}

/// A response envelope after status extraction and content decoding
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedEnvelope {
    /// Metadata echoed by the service; its shape is not guaranteed
    pub global_info: Value,
    pub return_state: ReturnStateInfo,
    pub description: DataDescription,
    pub signature: String,
    pub content: Content,
}

impl ParsedEnvelope {
    pub fn is_success(&self) -> bool {
        self.return_state.is_success()
    }

    /// Turn a remote failure status into an error
    pub fn into_result(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::remote(
                self.return_state.return_code,
                self.return_state.return_message,
            ))
        }
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawResponse {
    #[serde(default)]
    data: Option<RawData>,
    #[serde(default)]
    global_info: Value,
    #[serde(default)]
    return_state_info: Option<ReturnStateInfo>,
}

/// Response payload block; the service sends explicit nulls for absent parts
#[derive(Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawData {
    #[serde(default, deserialize_with = "lenient_string")]
    content: String,
    #[serde(default, deserialize_with = "lenient_string")]
    signature: String,
    #[serde(default)]
    data_description: Option<DataDescription>,
}

/// Content that serializes to nothing: null, "", {} or []
pub fn is_empty_content(content: &Value) -> bool {
    match content {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Object(map) => map.is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Fresh 128-bit correlation id as 32 uppercase hex characters
pub fn new_data_exchange_id() -> String {
    hex::encode_upper(rand::random::<[u8; 16]>())
}

/// Builds request envelopes for one caller
#[derive(Debug, Clone)]
pub struct EnvelopeCodec {
    caller: CallerIdentity,
    time: TimeSource,
}

impl EnvelopeCodec {
    pub fn new(caller: CallerIdentity, time: TimeSource) -> Self {
        Self { caller, time }
    }

    pub fn caller(&self) -> &CallerIdentity {
        &self.caller
    }

    pub fn time(&self) -> &TimeSource {
        &self.time
    }

    /// Metadata block for one request
    pub fn build_metadata(&self, interface_code: &str) -> GlobalInfo {
        GlobalInfo {
            app_id: APP_ID.to_string(),
            version: PROTOCOL_VERSION.to_string(),
            data_exchange_id: new_data_exchange_id(),
            interface_code: interface_code.to_string(),
            request_code: REQUEST_CODE.to_string(),
            request_time: self.time.now_request_format(),
            response_code: RESPONSE_CODE.to_string(),
            user_name: USER_NAME.to_string(),
            device_mac: DEVICE_MAC.to_string(),
            device_no: self.caller.device_no.clone(),
            tin: self.caller.tin.clone(),
            brn: self.caller.brn.clone(),
            taxpayer_id: self.caller.taxpayer_id.clone(),
            longitude: LONGITUDE.to_string(),
            latitude: LATITUDE.to_string(),
            agent_type: AGENT_TYPE.to_string(),
            extend_field: ExtendField {
                response_date_format: RESPONSE_DATE_FORMAT.to_string(),
                response_time_format: RESPONSE_TIME_FORMAT.to_string(),
                reference_no: String::new(),
                operator_name: self.caller.operator_name.clone(),
            },
        }
    }

    /// Plain Base64 content, signed when a key is supplied
    pub fn build_signed_plain(
        &self,
        content: &Value,
        interface_code: &str,
        signer: Option<&RsaPrivateKey>,
    ) -> Result<Envelope> {
        let (content, signature) = if is_empty_content(content) {
            (String::new(), String::new())
        } else {
            let json = serde_json::to_string(content)
                .map_err(|e| Error::Encryption(format!("Content is not serializable: {}", e)))?;
            let encoded = STANDARD.encode(json);
            let signature = match signer {
                Some(key) => crypto::sign(encoded.as_bytes(), key)?,
                None => {
                    debug!(interface_code, "No identity key supplied, sending unsigned");
                    String::new()
                }
            };
            (encoded, signature)
        };

        Ok(self.assemble(interface_code, content, signature, DataDescription::plain()))
    }

    /// AES-encrypted content, signed over the ciphertext
    pub fn build_signed_encrypted(
        &self,
        content: &Value,
        session_key: &[u8],
        interface_code: &str,
        signer: &RsaPrivateKey,
    ) -> Result<Envelope> {
        let json = serde_json::to_string(content)
            .map_err(|e| Error::Encryption(format!("Content is not serializable: {}", e)))?;
        let ciphertext = crypto::encrypt(json.as_bytes(), session_key)?;
        let signature = crypto::sign(ciphertext.as_bytes(), signer)?;

        Ok(self.assemble(interface_code, ciphertext, signature, DataDescription::encrypted()))
    }

    fn assemble(
        &self,
        interface_code: &str,
        content: String,
        signature: String,
        data_description: DataDescription,
    ) -> Envelope {
        Envelope {
            data: EnvelopeData {
                content,
                signature,
                data_description,
            },
            global_info: self.build_metadata(interface_code),
            return_state_info: ReturnStateInfo::default(),
        }
    }
}

/// Parse a response body and decode its content.
///
/// The status block is surfaced, not enforced. Binary-framed content needs
/// the session key; content that does not decode to JSON is kept as text,
/// or as raw bytes when it is not UTF-8.
pub fn parse_response(raw_json: &str, session_key: Option<&[u8]>) -> Result<ParsedEnvelope> {
    let raw: RawResponse = serde_json::from_str(raw_json)?;
    let data = raw.data.unwrap_or_default();
    let return_state = raw.return_state_info.unwrap_or_default();
    let description = data.data_description.unwrap_or_default();

    let content = if data.content.is_empty() {
        Content::Empty
    } else {
        let bytes = if description.is_binary_framed() {
            let key = session_key.ok_or_else(|| {
                Error::Encryption("Response is encrypted but no session key is available".to_string())
            })?;
            crypto::decrypt(
                &data.content,
                Some(key),
                description.is_encrypted(),
                description.is_compressed(),
            )?
        } else {
            crypto::decrypt(&data.content, None, false, description.is_compressed())?
        };

        match serde_json::from_slice::<Value>(&bytes) {
            Ok(value) => Content::Json(value),
            Err(_) => match String::from_utf8(bytes) {
                Ok(text) => Content::Text(text),
                Err(e) => Content::Binary(e.into_bytes()),
            },
        }
    };

    Ok(ParsedEnvelope {
        global_info: raw.global_info,
        return_state,
        description,
        signature: data.signature,
        content,
    })
}
