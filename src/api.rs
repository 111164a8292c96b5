//! HTTP API server for leadmine.

use crate::config::{Config, SmtpSettings};
use crate::error::AppError;
use crate::harvest::SearchScraper;
use crate::ledger::{Reconciler, ReconcilerSettings};
use crate::mailer::SmtpMailer;
use crate::models::{Campaign, CampaignSeed, ContactType, MailContent};
use crate::store::ContactStore;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Rejection, Reply, http::StatusCode};

/// Request body for the scrape endpoints.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct ScrapeRequest {
    query: Option<String>,
    #[serde(default)]
    location: String,
    #[serde(default)]
    platform: String,
    #[serde(default)]
    contact_type: ContactType,
    #[serde(default)]
    site: String,
}

/// Request body for the drain-and-dispatch endpoint.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct DispatchRequest {
    #[serde(default)]
    platform: String,
    #[serde(default)]
    contact_type: ContactType,
    #[serde(default)]
    site: String,
    email_subject: Option<String>,
    html_template: Option<String>,
}

/// Request body for the raw mail-send endpoint.
#[derive(Deserialize, Debug)]
#[serde(rename_all = "camelCase")]
struct SendMailRequest {
    email: Option<String>,
    smtp_host: Option<String>,
    smtp_port: Option<String>,
    smtp_user: Option<String>,
    smtp_password: Option<String>,
    subject: Option<String>,
    html_template: Option<String>,
}

#[derive(Serialize)]
struct HealthResponse {
    success: bool,
    message: String,
}

#[derive(Serialize)]
struct ContactsResponse {
    contacts: Vec<String>,
}

/// Dispatch answer when a backfill scrape ran.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct BackfillResponse {
    contacts: Vec<String>,
    sent_emails: Vec<String>,
}

/// Dispatch answer when the pending queue covered the whole batch.
#[derive(Serialize)]
struct DrainResponse {
    message: String,
    emails: Vec<String>,
}

#[derive(Serialize)]
struct SendResponse {
    message: String,
    info: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Shared handles for the request handlers.
#[derive(Clone)]
struct AppState {
    scraper: SearchScraper,
    reconciler: Arc<Reconciler<ContactStore, SmtpMailer, SearchScraper>>,
}

/// Custom rejection carrying the application error for the recover handler.
#[derive(Debug)]
struct ApiError(AppError);

impl warp::reject::Reject for ApiError {}

fn reject(err: AppError) -> Rejection {
    warp::reject::custom(ApiError(err))
}

/// Start the API server
pub(crate) async fn start_api_server(config: &Config, port: u16) -> anyhow::Result<()> {
    let store = ContactStore::connect(config.database_url()?).await?;
    store.ensure_schema().await?;
    let mailer = SmtpMailer::new(&config.smtp()?)?;
    let scraper = SearchScraper::new(config)?;

    let settings = ReconcilerSettings {
        batch_size: config.batch_size,
        backfill_queries: config.backfill_queries.clone(),
        backfill_locations: config.backfill_locations.clone(),
    };
    let state = AppState {
        scraper: scraper.clone(),
        reconciler: Arc::new(Reconciler::new(store, mailer, scraper, settings)),
    };
    let state_filter = warp::any().map(move || state.clone());

    // Health check endpoint
    let health = warp::path("health").and(warp::get()).map(|| {
        warp::reply::json(&HealthResponse {
            success: true,
            message: "leadmine API is running".to_string(),
        })
    });

    // Scrape-only endpoint
    let scrape = warp::path("scrape")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_scrape);

    // Mail-ready contact dump; answers exactly like /scrape
    let maildump = warp::path("maildump")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_scrape);

    // Drain-and-dispatch endpoint
    let dispatch = warp::path("dispatch")
        .and(warp::post())
        .and(warp::body::json())
        .and(state_filter.clone())
        .and_then(handle_dispatch);

    // Raw mail send with caller-supplied SMTP settings
    let send = warp::path("send")
        .and(warp::post())
        .and(warp::body::json())
        .and_then(handle_send);

    // Combine all routes
    let routes = health
        .or(scrape)
        .or(maildump)
        .or(dispatch)
        .or(send)
        .with(warp::cors().allow_any_origin())
        .recover(handle_rejection);

    tracing::info!("Starting API server on port {}", port);
    warp::serve(routes).run(([0, 0, 0, 0], port)).await;

    Ok(())
}

/// Handle a scrape request: one harvest pass, no persistence.
async fn handle_scrape(
    request: ScrapeRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let query = match request.query.as_deref().map(str::trim) {
        Some(q) if !q.is_empty() => q.to_string(),
        _ => return Err(reject(AppError::Validation("Query is required".to_string()))),
    };

    let campaign = Campaign {
        query,
        location: request.location,
        platform: request.platform,
        contact_type: request.contact_type,
        site: request.site,
    };

    tracing::info!("Processing scrape request for \"{}\"", campaign.query);
    let mut contacts: Vec<String> = state
        .scraper
        .harvest(&campaign)
        .await
        .map_err(reject)?
        .into_iter()
        .collect();
    contacts.sort();

    Ok(warp::reply::json(&ContactsResponse { contacts }))
}

/// Handle a drain-and-dispatch request.
async fn handle_dispatch(
    request: DispatchRequest,
    state: AppState,
) -> Result<impl Reply, Rejection> {
    let (subject, html_template) = match (request.email_subject, request.html_template) {
        (Some(subject), Some(template)) if !subject.is_empty() && !template.is_empty() => {
            (subject, template)
        }
        _ => {
            return Err(reject(AppError::Validation(
                "emailSubject and htmlTemplate are required".to_string(),
            )));
        }
    };

    let seed = CampaignSeed {
        platform: request.platform,
        contact_type: request.contact_type,
        site: request.site,
    };
    let mail = MailContent {
        subject,
        html_template,
    };

    tracing::info!("Processing dispatch request for platform \"{}\"", seed.platform);
    let report = state
        .reconciler
        .drain_and_dispatch(&seed, &mail)
        .await
        .map_err(reject)?;

    if report.backfilled {
        Ok(warp::reply::json(&BackfillResponse {
            contacts: report.contacts,
            sent_emails: report.sent,
        }))
    } else {
        Ok(warp::reply::json(&DrainResponse {
            message: "Emails sent to pending contacts".to_string(),
            emails: report.sent,
        }))
    }
}

/// Handle a raw mail send with SMTP settings taken from the request itself.
async fn handle_send(request: SendMailRequest) -> Result<impl Reply, Rejection> {
    let missing_required = [
        &request.email,
        &request.smtp_host,
        &request.smtp_port,
        &request.smtp_user,
        &request.smtp_password,
        &request.subject,
        &request.html_template,
    ]
    .iter()
    .any(|field| field.as_deref().is_none_or(str::is_empty));
    if missing_required {
        return Err(reject(AppError::Validation(
            "All parameters are required".to_string(),
        )));
    }

    let port: u16 = request
        .smtp_port
        .as_deref()
        .unwrap_or_default()
        .parse()
        .map_err(|_| reject(AppError::Validation("smtpPort must be a number".to_string())))?;

    let settings = SmtpSettings {
        host: request.smtp_host.unwrap_or_default(),
        port,
        user: request.smtp_user.unwrap_or_default(),
        password: request.smtp_password.unwrap_or_default(),
    };
    let email = request.email.unwrap_or_default();

    let mailer = SmtpMailer::new(&settings).map_err(reject)?;
    let response = mailer
        .send_outreach(
            &email,
            request.subject.as_deref().unwrap_or_default(),
            request.html_template.as_deref().unwrap_or_default(),
        )
        .await
        .map_err(reject)?;

    Ok(warp::reply::json(&SendResponse {
        message: "Email sent successfully".to_string(),
        info: format!(
            "{} {}",
            response.code(),
            response.message().collect::<Vec<&str>>().join(" ")
        ),
    }))
}

/// Map rejections to the JSON error body; internal detail stays in the logs.
async fn handle_rejection(err: Rejection) -> Result<impl Reply, Infallible> {
    let (status, message) = if let Some(ApiError(app_error)) = err.find::<ApiError>() {
        match app_error {
            AppError::Validation(reason) => (StatusCode::BAD_REQUEST, reason.clone()),
            other => {
                tracing::error!("Request failed: {}", other);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An error occurred while processing your request".to_string(),
                )
            }
        }
    } else if let Some(body_error) = err.find::<warp::filters::body::BodyDeserializeError>() {
        (StatusCode::BAD_REQUEST, body_error.to_string())
    } else if err.is_not_found() {
        (StatusCode::NOT_FOUND, "Not Found".to_string())
    } else {
        (StatusCode::BAD_REQUEST, "Bad request".to_string())
    };

    Ok(warp::reply::with_status(
        warp::reply::json(&ErrorBody { error: message }),
        status,
    ))
}
