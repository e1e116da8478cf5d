//! Path / outbound handling.
//!
//! Two unrelated pieces of RFC 5626/5626-adjacent plumbing share this
//! module because both hang off the same router step:
//! REGISTER's own `Path`/`outbound` negotiation, and the flow-token
//! (`NkF<base64>`) carried on the top `Route` of every other request once
//! this application has record-routed onto a flow.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use rvoip_sip_core::prelude::*;

use crate::call::Call;
use crate::collaborators::ConnectionHandle;
use crate::error::Error;
use crate::transaction::ProxyOptions;

const FLOW_TOKEN_PREFIX: &str = "NkF";

fn supported_tokens(request: &Request) -> Vec<String> {
    match request.header(&HeaderName::Supported) {
        Some(TypedHeader::Supported(s)) => s.0.iter().map(|t| t.to_ascii_lowercase()).collect(),
        _ => Vec::new(),
    }
}

fn is_dialog_forming(method: &Method) -> bool {
    matches!(method, Method::Invite | Method::Subscribe | Method::Refer)
}

fn top_route_uri(request: &Request) -> Option<Uri> {
    match request.header(&HeaderName::Route) {
        Some(TypedHeader::Route(route)) => route.0.first().map(|entry| entry.0.uri.clone()),
        _ => None,
    }
}

fn decode_flow_token(uri: &Uri) -> Result<String, Error> {
    let user = uri.user.as_deref().ok_or(Error::Forbidden)?;
    let encoded = user.strip_prefix(FLOW_TOKEN_PREFIX).ok_or(Error::Forbidden)?;
    let bytes = STANDARD.decode(encoded).map_err(|_| Error::Forbidden)?;
    String::from_utf8(bytes).map_err(|_| Error::Forbidden)
}

fn contacts_of(request: &Request) -> Vec<&ContactParamInfo> {
    request
        .headers
        .iter()
        .filter_map(|h| match h {
            TypedHeader::Contact(c) => Some(c),
            _ => None,
        })
        .flat_map(|c| c.params().iter())
        .collect()
}

/// Apply REGISTER `make_path` negotiation.
fn apply_register_path(call: &Call, request: &Request, mut opts: ProxyOptions) -> Result<ProxyOptions, Error> {
    let supported = supported_tokens(request);
    if !supported.iter().any(|t| t == "path") {
        return Err(Error::ExtensionRequired("path".to_string()));
    }

    let contacts = contacts_of(request);
    let app_supports_outbound = call.config.supported_extensions.contains("outbound");
    let ua_supports_outbound = supported.iter().any(|t| t == "outbound");
    let single_via = request.via_headers().iter().map(|v| v.headers().len()).sum::<usize>() == 1;

    if contacts.len() == 1 && app_supports_outbound && ua_supports_outbound && single_via {
        let has_reg_id = contacts[0].address.params.iter().any(|p| p.key() == "reg-id");
        if has_reg_id {
            let branch = request.first_via().and_then(|v| v.branch().map(|b| b.to_string())).unwrap_or_default();
            opts.flow = Some(ConnectionHandle(format!("reg:{branch}")));
        }
    }

    Ok(opts)
}

/// Apply flow-token resolution off the top `Route` for any non-REGISTER
/// request.
async fn apply_flow_token(call: &Call, request: &Request, mut opts: ProxyOptions) -> Result<ProxyOptions, Error> {
    if !call.collabs.transport.is_local_route(request) {
        return Ok(opts);
    }

    let Some(route_uri) = top_route_uri(request) else {
        return Ok(opts);
    };

    let handle_str = decode_flow_token(&route_uri)?;
    let handle = ConnectionHandle(handle_str);

    if call.collabs.transport.get_connected(&handle).await.is_none() {
        return Err(Error::FlowFailed);
    }
    opts.flow = Some(handle);

    let to_tag_empty = request.to().and_then(|t| t.tag()).is_none();
    let carries_ob = route_uri.parameters.iter().any(|p| p.key() == "ob");
    if is_dialog_forming(&request.method) && to_tag_empty && carries_ob {
        opts.record_route = true;
    }

    Ok(opts)
}

/// Entry point for router step 8.
pub async fn apply(call: &Call, request: &Request, opts: ProxyOptions) -> Result<ProxyOptions, Error> {
    if request.method == Method::Register && opts.make_path {
        apply_register_path(call, request, opts)
    } else {
        apply_flow_token(call, request, opts).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn flow_token_without_prefix_is_forbidden() {
        let uri = Uri::from_str("sip:alice@example.com").unwrap();
        assert!(decode_flow_token(&uri).is_err());
    }
}
