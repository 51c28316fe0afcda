use extism_pdk::HttpRequest;
use ocigetter::{CapabilityError, HostCapability, HostRequest, HostResponse};

/// The Extism `http_request` host function.
///
/// The host keeps a single value per request header name, so repeated names
/// are applied in order and the last one wins. Which hosts may be reached is
/// decided by the host's `allowed_hosts`.
pub struct ExtismHost;

impl HostCapability for ExtismHost {
    fn send(&self, req: HostRequest) -> Result<HostResponse, CapabilityError> {
        let mut call = HttpRequest::new(&req.url).with_method(req.method.as_str());
        for (name, value) in &req.headers {
            call = call.with_header(name, value);
        }

        let resp = extism_pdk::http::request::<Vec<u8>>(&call, req.body)
            .map_err(|e| CapabilityError(format!("{} {}: {e}", req.method.as_str(), req.url)))?;

        Ok(HostResponse {
            status: resp.status_code(),
            headers: resp
                .headers()
                .iter()
                .map(|(name, value)| (name.clone(), value.clone()))
                .collect(),
            body: resp.body(),
        })
    }
}
