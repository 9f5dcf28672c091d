use crate::{
    error::SisError,
    sis::{PageRequest, SisClient, SisPage},
};
use async_trait::async_trait;
use model::records::raw::RawRecord;
use reqwest::{Client, Identity, StatusCode, Url, header::RETRY_AFTER};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

/// Client certificate presented to the SIS, as PEM.
#[derive(Clone)]
pub struct ClientIdentity {
    pub certificate_pem: Vec<u8>,
    pub key_pem: Vec<u8>,
}

impl std::fmt::Debug for ClientIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientIdentity").finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct HttpSisConfig {
    pub base_url: String,
    pub timeout: Duration,
    pub identity: Option<ClientIdentity>,
}

#[derive(Deserialize)]
struct PageBody {
    records: Vec<Value>,
    #[serde(default)]
    next_page: Option<u32>,
}

pub struct HttpSisClient {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpSisClient {
    pub fn new(config: HttpSisConfig) -> Result<Self, SisError> {
        let mut builder = Client::builder().timeout(config.timeout);

        if let Some(identity) = &config.identity {
            let identity = Identity::from_pkcs8_pem(&identity.certificate_pem, &identity.key_pem)
                .map_err(|e| SisError::Config(format!("invalid client identity: {e}")))?;
            builder = builder.identity(identity);
        }

        let client = builder
            .build()
            .map_err(|e| SisError::Config(e.to_string()))?;

        let base_url = Url::parse(&config.base_url)
            .map_err(|e| SisError::Config(format!("invalid SIS base url: {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(SisError::Config(format!(
                "SIS base url {base_url} cannot carry a path"
            )));
        }

        Ok(Self {
            client,
            base_url,
            timeout: config.timeout,
        })
    }

    /// `{base}/schools/{school_id}/attendance`, with the id escaped as one
    /// path segment.
    fn endpoint(&self, request: &PageRequest) -> Result<Url, SisError> {
        let school = request.school_id.as_str();
        if school.is_empty() || school == "." || school == ".." {
            return Err(SisError::Config(format!(
                "school id {school:?} is not a usable path segment"
            )));
        }

        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| {
                SisError::Config(format!("SIS base url {} cannot carry a path", self.base_url))
            })?
            .pop_if_empty()
            .extend(["schools", school, "attendance"]);
        Ok(url)
    }

    fn map_transport(&self, err: reqwest::Error) -> SisError {
        if err.is_timeout() {
            SisError::Timeout(self.timeout)
        } else if err.is_decode() {
            SisError::Decode(err.to_string())
        } else {
            SisError::Connect(err.to_string())
        }
    }
}

fn retry_after(headers: &reqwest::header::HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

#[async_trait]
impl SisClient for HttpSisClient {
    async fn fetch_page(&self, request: &PageRequest) -> Result<SisPage, SisError> {
        let start = request.date_range.start.format("%Y-%m-%d").to_string();
        let end = request.date_range.end.format("%Y-%m-%d").to_string();
        let page = request.page.to_string();
        let page_size = request.page_size.to_string();

        let response = self
            .client
            .get(self.endpoint(request)?)
            .query(&[
                ("start", start.as_str()),
                ("end", end.as_str()),
                ("page", page.as_str()),
                ("page_size", page_size.as_str()),
            ])
            .send()
            .await
            .map_err(|e| self.map_transport(e))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(SisError::from_status(
                status.as_u16(),
                retry_after(response.headers()),
            ));
        }

        let bytes = response.bytes().await.map_err(|e| self.map_transport(e))?;
        // serde messages can echo payload fragments; keep only the position.
        let body: PageBody = serde_json::from_slice(&bytes).map_err(|e| {
            SisError::Decode(format!(
                "malformed page body ({:?} at line {} column {})",
                e.classify(),
                e.line(),
                e.column()
            ))
        })?;

        debug!(
            school_id = %request.school_id,
            page = request.page,
            records = body.records.len(),
            next_page = ?body.next_page,
            "Fetched SIS page"
        );

        Ok(SisPage {
            records: body.records.into_iter().map(RawRecord::from_value).collect(),
            next_page: body.next_page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        Json, Router,
        extract::{Path, Query},
        http::StatusCode as AxumStatus,
        response::IntoResponse,
        routing::get,
    };
    use chrono::NaiveDate;
    use model::core::{date_range::DateRange, identifiers::SchoolId};
    use serde_json::json;
    use std::collections::HashMap;

    async fn attendance(
        Path(school): Path<String>,
        Query(params): Query<HashMap<String, String>>,
    ) -> axum::response::Response {
        match school.as_str() {
            "SCH-1" => {
                let page: u32 = params["page"].parse().unwrap();
                assert_eq!(params["start"], "2024-09-02");
                assert_eq!(params["page_size"], "2");
                let next = if page == 1 { json!(2) } else { json!(null) };
                Json(json!({
                    "records": [{"student_id": "S-1", "page": page}, "garbage"],
                    "next_page": next,
                }))
                .into_response()
            }
            "SCH/1?x=y" => Json(json!({ "records": [{"school_id": "SCH/1?x=y"}] })).into_response(),
            "SCH-429" => (AxumStatus::TOO_MANY_REQUESTS, [("retry-after", "7")], "slow down")
                .into_response(),
            "SCH-401" => AxumStatus::UNAUTHORIZED.into_response(),
            "SCH-500" => AxumStatus::BAD_GATEWAY.into_response(),
            _ => (AxumStatus::OK, "not json").into_response(),
        }
    }

    async fn spawn_sis() -> String {
        let app = Router::new().route("/schools/:school/attendance", get(attendance));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}/")
    }

    fn request(school: &str) -> PageRequest {
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 9, 2).unwrap(),
            NaiveDate::from_ymd_opt(2024, 9, 6).unwrap(),
        )
        .unwrap();
        PageRequest::first(SchoolId::from(school), range, 2)
    }

    fn client(base_url: String) -> HttpSisClient {
        HttpSisClient::new(HttpSisConfig {
            base_url,
            timeout: Duration::from_secs(5),
            identity: None,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn follows_the_pagination_contract() {
        let client = client(spawn_sis().await);

        let first = client.fetch_page(&request("SCH-1")).await.unwrap();
        assert_eq!(first.next_page, Some(2));
        assert_eq!(first.records.len(), 2);
        assert!(first.records[0].fields().is_some());
        assert!(matches!(first.records[1], RawRecord::Unparsed { .. }));

        let second = client.fetch_page(&request("SCH-1").next(2)).await.unwrap();
        assert_eq!(second.next_page, None);
    }

    #[tokio::test]
    async fn maps_http_failures() {
        let client = client(spawn_sis().await);

        match client.fetch_page(&request("SCH-429")).await {
            Err(SisError::RateLimited { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_secs(7)))
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            client.fetch_page(&request("SCH-401")).await,
            Err(SisError::Auth { status: 401 })
        ));
        assert!(matches!(
            client.fetch_page(&request("SCH-500")).await,
            Err(SisError::Server { status: 502 })
        ));
        assert!(matches!(
            client.fetch_page(&request("SCH-bad")).await,
            Err(SisError::Decode(_))
        ));
    }

    #[tokio::test]
    async fn school_id_stays_a_single_path_segment() {
        let client = client(spawn_sis().await);

        let page = client.fetch_page(&request("SCH/1?x=y")).await.unwrap();
        assert_eq!(page.records.len(), 1);
        assert_eq!(page.next_page, None);

        assert!(matches!(
            client.fetch_page(&request("..")).await,
            Err(SisError::Config(_))
        ));
    }

    #[test]
    fn base_path_is_kept_in_front_of_the_resource() {
        let client = client("http://sis.example/api/v2/".to_string());
        let url = client.endpoint(&request("a/b")).unwrap();
        assert_eq!(url.as_str(), "http://sis.example/api/v2/schools/a%2Fb/attendance");

        assert!(matches!(
            HttpSisClient::new(HttpSisConfig {
                base_url: "not a url".to_string(),
                timeout: Duration::from_secs(1),
                identity: None,
            }),
            Err(SisError::Config(_))
        ));
    }

    #[tokio::test]
    async fn unreachable_host_is_a_connect_error() {
        let client = client("http://127.0.0.1:9".to_string());
        let err = client.fetch_page(&request("SCH-1")).await.unwrap_err();
        assert!(err.is_transient());
    }
}
