use {
    base64::{Engine as _, engine::general_purpose::STANDARD},
    reqwest::Client,
    tracing::debug,
    wagate_common::{Error, Result},
};

use crate::mime;

/// Raw media supplied by a caller, with its best-known MIME type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaPayload {
    pub data: Vec<u8>,
    pub mimetype: String,
}

/// Decode a `data:<mime>;base64,<payload>` URL.
pub fn decode_data_url(input: &str) -> Result<MediaPayload> {
    let rest = input
        .strip_prefix("data:")
        .ok_or_else(|| Error::validation("base64 field must start with 'data:'"))?;
    let (header, body) = rest
        .split_once(',')
        .ok_or_else(|| Error::validation("malformed data URL"))?;

    let mut parts = header.split(';');
    let declared = parts.next().unwrap_or("").trim();
    if !parts.any(|p| p.eq_ignore_ascii_case("base64")) {
        return Err(Error::validation("data URL must be base64 encoded"));
    }

    let data = STANDARD
        .decode(body.trim())
        .map_err(|_| Error::validation("could not decode base64 payload"))?;
    let mimetype = if declared.is_empty() {
        mime::detect(&data).to_string()
    } else {
        declared.to_string()
    };
    Ok(MediaPayload { data, mimetype })
}

/// GET a remote file. Anything but `200 OK` is an error.
pub async fn fetch_remote(client: &Client, url: &str) -> Result<MediaPayload> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|e| Error::validation(format!("failed to GET {url}: {e}")))?;

    let status = response.status();
    if status != reqwest::StatusCode::OK {
        return Err(Error::validation(format!(
            "failed to fetch {url}, status code: {}",
            status.as_u16()
        )));
    }

    let header_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let data = response
        .bytes()
        .await
        .map_err(|e| Error::validation(format!("failed to read {url}: {e}")))?
        .to_vec();

    let mimetype = match header_type {
        Some(t) if t != "application/octet-stream" => t,
        _ => match mime::from_path(url) {
            "application/octet-stream" => mime::detect(&data).to_string(),
            guessed => guessed.to_string(),
        },
    };
    debug!(url, size = data.len(), %mimetype, "fetched remote media");
    Ok(MediaPayload { data, mimetype })
}

/// Last path segment of a URL, used as a fallback document name.
pub fn file_name_from_url(url: &str) -> Option<String> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    path.rsplit('/')
        .next()
        .filter(|s| !s.is_empty() && !s.contains(':'))
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_url_decoding() {
        let p = decode_data_url("data:audio/ogg;base64,T2dnUw==").unwrap();
        assert_eq!(p.data, b"OggS");
        assert_eq!(p.mimetype, "audio/ogg");

        let sniffed = decode_data_url("data:;base64,T2dnUw==").unwrap();
        assert_eq!(sniffed.mimetype, "audio/ogg");
    }

    #[test]
    fn data_url_rejections() {
        assert!(decode_data_url("T2dnUw==").is_err());
        assert!(decode_data_url("data:text/plain,hello").is_err());
        assert!(decode_data_url("data:image/png;base64,@@@").is_err());
        assert!(decode_data_url("data:image/png;base64").is_err());
    }

    #[test]
    fn url_file_names() {
        assert_eq!(
            file_name_from_url("https://cdn.test/docs/report.pdf?sig=1"),
            Some("report.pdf".into())
        );
        assert_eq!(file_name_from_url("https://cdn.test/docs/"), None);
    }

    #[tokio::test]
    async fn remote_fetch() {
        let mut server = mockito::Server::new_async().await;
        let _ok = server
            .mock("GET", "/voice.mp3")
            .with_status(200)
            .with_body("ID3....")
            .create_async()
            .await;
        let _missing = server
            .mock("GET", "/gone.png")
            .with_status(404)
            .create_async()
            .await;

        let client = Client::new();
        let p = fetch_remote(&client, &format!("{}/voice.mp3", server.url()))
            .await
            .unwrap();
        assert_eq!(p.data, b"ID3....");
        assert_eq!(p.mimetype, "audio/mpeg");

        let err = fetch_remote(&client, &format!("{}/gone.png", server.url()))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("404"));
    }
}
