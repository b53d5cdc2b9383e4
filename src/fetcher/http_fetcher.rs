use super::Fetchable;
use async_trait::async_trait;
use log::debug;
use reqwest::header;
use reqwest::{StatusCode, Url};
use std::time::Duration;
use crate::fetcher::{FetchedObject, FetchError, ResponseMetadata};

pub struct HttpFetcher {
    reqwest: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<HttpFetcher, FetchError> {
        Ok(HttpFetcher {
            reqwest: reqwest::Client::builder().timeout(timeout).build()?,
        })
    }

    async fn fetch_with_meta(&self, link: &str, cached: Option<&FetchedObject>) -> Result<reqwest::Response, reqwest::Error> {
        let mut request_builder = self.reqwest.get(link);
        if let Some(cached) = cached {
            let validators = [
                (header::ETAG, header::IF_NONE_MATCH),
                (header::LAST_MODIFIED, header::IF_MODIFIED_SINCE),
            ];
            for (stored, conditional) in validators.iter() {
                if let Some(value) = cached.metadata.header(stored.as_str()) {
                    request_builder = request_builder.header(conditional, value.as_str());
                }
            }
        }
        request_builder.send().await
    }

    fn read_metadata(response: &reqwest::Response) -> ResponseMetadata {
        let mut metadata = ResponseMetadata {
            status: response.status().as_u16(),
            ..ResponseMetadata::default()
        };
        for (name, value) in response.headers().iter() {
            if let Ok(value) = value.to_str() {
                metadata.append_header(name.as_str(), value);
            }
        }
        metadata.mime = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|content_type| content_type.to_str().ok())
            .and_then(|content_type| content_type.parse().ok())
            .unwrap_or(mime::APPLICATION_OCTET_STREAM);
        metadata
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return FetchError::Timeout;
        }
        FetchError::FetchFailed(
            format!(
                "Error occurred while fetching data. {:#}", err
            )
        )
    }
}

#[async_trait]
impl Fetchable for HttpFetcher {
    fn can_fetch(&self, link: &str) -> bool {
        match Url::parse(link) {
            Ok(url) => url.scheme() == "http" || url.scheme() == "https",
            Err(_) => false,
        }
    }

    async fn fetch(&self, link: &str, cached: Option<&FetchedObject>) -> Result<FetchedObject, FetchError> {
        let response = self.fetch_with_meta(link, cached).await?;

        if response.status() == StatusCode::NOT_MODIFIED {
            return match cached {
                Some(cached) => {
                    debug!("{} not modified, reusing cached body", link);
                    Ok(cached.clone())
                }
                None => Err(FetchError::FetchFailed(
                    format!("Unexpected 304 for uncached URL {}", link)
                )),
            };
        }

        match response.status() {
            status if status.is_success() => (),
            StatusCode::NOT_FOUND => return Err(FetchError::NotFound),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(FetchError::NoAccess),
            status => {
                return Err(FetchError::FetchFailed(
                    format!("Failed to fetch object. URL {}, Code: {}", link, status)
                ));
            }
        }

        let metadata = HttpFetcher::read_metadata(&response);
        let bytes = response.bytes().await?;

        Ok(FetchedObject { bytes, metadata })
    }
}
