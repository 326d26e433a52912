use anyhow::{bail, Result};
use embedded_svc::http::client::Client;
use embedded_svc::http::Method;
use embedded_svc::io::{Read, Write};
use esp_idf_svc::http::client::{Configuration, EspHttpConnection};
use log::info;

use crate::debug_flags;
use crate::helix::{HttpClient, HttpResponse};

const TIMEOUT_MS: u64 = 15_000;
const MAX_BODY: usize = 32 * 1024;

/// HTTPS client over `EspHttpConnection`, one connection per request.
#[derive(Default)]
pub struct EspHttp;

impl EspHttp {
    fn client() -> Result<Client<EspHttpConnection>> {
        let config = Configuration {
            timeout: Some(std::time::Duration::from_millis(TIMEOUT_MS)),
            use_global_ca_store: true,
            crt_bundle_attach: Some(esp_idf_sys::esp_crt_bundle_attach),
            ..Default::default()
        };
        Ok(Client::wrap(EspHttpConnection::new(&config)?))
    }
}

fn read_body<R: Read>(reader: &mut R) -> Result<String>
where
    R::Error: std::error::Error + Send + Sync + 'static,
{
    let mut body: Vec<u8> = Vec::new();
    let mut buf = [0u8; 1024];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        body.extend_from_slice(&buf[..n]);
        if body.len() > MAX_BODY {
            bail!("response too large (>{} bytes)", MAX_BODY);
        }
    }
    Ok(String::from_utf8(body)?)
}

fn log_request(method: &str, url: &str, status: u16) {
    if debug_flags::is_on(&debug_flags::DEBUG_HELIX) {
        info!("HTTP {} {} -> {}", method, url.chars().take(80).collect::<String>(), status);
    }
}

impl HttpClient for EspHttp {
    fn get(&mut self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse> {
        let mut client = Self::client()?;
        let mut response = client.request(Method::Get, url, headers)?.submit()?;
        let status = response.status();
        log_request("GET", url, status);
        let body = read_body(&mut response)?;
        Ok(HttpResponse { status, body })
    }

    fn post(&mut self, url: &str, headers: &[(&str, &str)], body: &str) -> Result<HttpResponse> {
        let len = body.len().to_string();
        let mut all_headers: Vec<(&str, &str)> = headers.to_vec();
        all_headers.push(("Content-Length", &len));

        let mut client = Self::client()?;
        let mut request = client.request(Method::Post, url, &all_headers)?;
        request.write_all(body.as_bytes())?;
        request.flush()?;
        let mut response = request.submit()?;
        let status = response.status();
        log_request("POST", url, status);
        let body = read_body(&mut response)?;
        Ok(HttpResponse { status, body })
    }
}
