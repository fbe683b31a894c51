use crate::db::{Page, RecordFilter, Sort, SortField, SortOrder, Store};
use crate::errors::BooruErrors;
use crate::record::{split_tags, ImageRecord};
use crate::scanner::{is_image_name, list_files};
use crate::AppContext;

use anyhow::Context;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;
use tower_http::services::ServeDir;

/// Number of records the home page samples for its tag summary.
const HOME_TAG_SAMPLE: u64 = 1000;

#[derive(Debug)]
pub enum AppError {
    NotFound(&'static str),
    BadRequest(String),
    Forbidden(&'static str),
    Internal(String),
}

impl From<BooruErrors> for AppError {
    fn from(e: BooruErrors) -> Self {
        AppError::Internal(e.to_string())
    }
}

#[derive(Serialize)]
struct ErrorBody {
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg.to_owned()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg.to_owned()),
            AppError::Internal(detail) => {
                error!("Request failed: {detail}");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "An internal error occurred".to_owned(),
                )
            }
        };
        (status, Json(ErrorBody { message })).into_response()
    }
}

type AppResult<T> = Result<T, AppError>;

pub fn app(ctx: AppContext) -> Router {
    let images = ServeDir::new(ctx.config.paths.images_dir());
    let thumbnails = ServeDir::new(ctx.config.paths.thumbnails_dir());
    Router::new()
        .route("/", get(index))
        .route("/gallery", get(gallery))
        .route("/image/:image_id", get(view_image))
        .route("/tagcloud", get(tagcloud))
        .route("/search", get(search))
        .route("/debug/images", get(debug_images))
        .nest_service("/static/images", images)
        .nest_service("/static/thumbnails", thumbnails)
        .with_state(ctx)
}

pub async fn serve(ctx: AppContext) -> anyhow::Result<()> {
    let address = format!("{}:{}", ctx.config.server.host, ctx.config.server.port);
    let addr = tokio::net::lookup_host(&address)
        .await
        .with_context(|| format!("could not resolve {address}"))?
        .next()
        .with_context(|| format!("no address found for {address}"))?;
    info!("Listening on http://{addr}");
    axum::Server::bind(&addr)
        .serve(app(ctx).into_make_service())
        .await
        .context("server stopped unexpectedly")?;
    Ok(())
}

/// Runs `query` against the store on the blocking pool.
async fn with_store<T, F>(ctx: &AppContext, query: F) -> AppResult<T>
where
    T: Send + 'static,
    F: FnOnce(&Store) -> Result<T, BooruErrors> + Send + 'static,
{
    let store = ctx.store.clone();
    tokio::task::spawn_blocking(move || {
        let store = store
            .lock()
            .map_err(|_| BooruErrors::Db("store lock poisoned".to_owned()))?;
        query(&store)
    })
    .await
    .map_err(|e| AppError::Internal(e.to_string()))?
    .map_err(AppError::from)
}

fn parse_page(page: Option<&str>) -> i64 {
    page.and_then(|p| p.trim().parse().ok()).unwrap_or(1)
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagCount {
    pub tag: String,
    pub count: u64,
}

/// Most frequent tags across every joined tag string, ties broken by name.
pub fn top_tags(tag_strings: &[String], limit: usize) -> Vec<TagCount> {
    let mut counts: HashMap<&str, u64> = HashMap::new();
    for joined in tag_strings {
        for tag in split_tags(joined) {
            *counts.entry(tag).or_insert(0) += 1;
        }
    }
    let mut tags: Vec<TagCount> = counts
        .into_iter()
        .map(|(tag, count)| TagCount {
            tag: tag.to_owned(),
            count,
        })
        .collect();
    tags.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.tag.cmp(&b.tag)));
    tags.truncate(limit);
    tags
}

#[derive(Debug, Serialize)]
pub struct Stats {
    pub total_images: u64,
    pub active_images: u64,
    pub top_tags: Vec<TagCount>,
}

async fn index(State(ctx): State<AppContext>) -> AppResult<Json<Stats>> {
    let limit = ctx.config.ui.tag_cloud_limit;
    let stats = with_store(&ctx, move |store| {
        let active = RecordFilter {
            exclude_deleted: true,
            exclude_banned: true,
        };
        Ok(Stats {
            total_images: store.count()?,
            active_images: store.count_filtered(&active, &[])?,
            top_tags: top_tags(
                &store.tag_strings(&RecordFilter::default(), Some(HOME_TAG_SAMPLE))?,
                limit,
            ),
        })
    })
    .await?;
    Ok(Json(stats))
}

#[derive(Debug, Default, Deserialize)]
pub struct GalleryQuery {
    pub page: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ImagePage {
    pub images: Vec<ImageRecord>,
    pub page: Page,
}

async fn gallery(
    State(ctx): State<AppContext>,
    Query(query): Query<GalleryQuery>,
) -> AppResult<Json<ImagePage>> {
    let mut sort = ctx.config.gallery_sort();
    if let Some(field) = &query.sort_by {
        sort.field = SortField::from_str(field)
            .map_err(|_| AppError::BadRequest(format!("cannot sort by {field:?}")))?;
    }
    if let Some(order) = &query.sort_order {
        sort.order = SortOrder::from_str(order)
            .map_err(|_| AppError::BadRequest(format!("unknown sort order {order:?}")))?;
    }
    let requested = parse_page(query.page.as_deref());
    list_page(&ctx, requested, vec![], sort).await.map(Json)
}

async fn list_page(
    ctx: &AppContext,
    requested: i64,
    terms: Vec<String>,
    sort: Sort,
) -> AppResult<ImagePage> {
    let filter = ctx.config.record_filter();
    let per_page = ctx.config.gallery.images_per_page;
    with_store(ctx, move |store| {
        let total = store.count_filtered(&filter, &terms)?;
        let page = Page::clamp(requested, per_page, total);
        let images = store.page(&filter, &terms, &sort, &page)?;
        Ok(ImagePage { images, page })
    })
    .await
}

#[derive(Debug, Serialize)]
pub struct ImageView {
    pub image: ImageRecord,
    pub prev_id: Option<i64>,
    pub next_id: Option<i64>,
}

async fn view_image(
    State(ctx): State<AppContext>,
    Path(image_id): Path<i64>,
) -> AppResult<Json<ImageView>> {
    let view = with_store(&ctx, move |store| {
        let Some(image) = store.get(image_id)? else {
            return Ok(None);
        };
        let (prev_id, next_id) = store.neighbors(image_id)?;
        Ok(Some(ImageView {
            image,
            prev_id,
            next_id,
        }))
    })
    .await?;
    view.map(Json).ok_or(AppError::NotFound("Image not found"))
}

async fn tagcloud(State(ctx): State<AppContext>) -> AppResult<Json<Vec<TagCount>>> {
    let filter = ctx.config.record_filter();
    let limit = ctx.config.ui.tag_cloud_limit;
    let tags = with_store(&ctx, move |store| {
        Ok(top_tags(&store.tag_strings(&filter, None)?, limit))
    })
    .await?;
    info!("Generated tag cloud with {} tags", tags.len());
    Ok(Json(tags))
}

#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    pub q: Option<String>,
    pub page: Option<String>,
}

/// Comma-separated search terms, trimmed, blanks dropped.
pub fn search_terms(query: &str) -> Vec<String> {
    split_tags(query).map(str::to_owned).collect()
}

async fn search(State(ctx): State<AppContext>, Query(query): Query<SearchQuery>) -> Response {
    let terms = search_terms(query.q.as_deref().unwrap_or_default());
    if terms.is_empty() {
        return Redirect::to("/gallery").into_response();
    }
    let requested = parse_page(query.page.as_deref());
    let sort = ctx.config.gallery_sort();
    match list_page(&ctx, requested, terms, sort).await {
        Ok(page) => Json(page).into_response(),
        Err(e) => e.into_response(),
    }
}

#[derive(Debug, Serialize)]
pub struct DebugRecord {
    pub id: i64,
    pub md5: String,
    pub file_ext: String,
    pub expected_filename: String,
}

#[derive(Debug, Serialize)]
pub struct DebugInfo {
    pub static_folder: String,
    pub images_dir: String,
    pub total_files: usize,
    pub total_images: usize,
    pub sample_files: Vec<String>,
    pub database_records: Vec<DebugRecord>,
}

async fn debug_images(State(ctx): State<AppContext>) -> AppResult<Json<DebugInfo>> {
    if !ctx.config.server.debug {
        return Err(AppError::Forbidden("Debug mode is disabled"));
    }
    let static_folder = ctx.config.paths.static_folder.display().to_string();
    let images_dir = ctx.config.paths.images_dir();
    let info = with_store(&ctx, move |store| {
        let files = list_files(&images_dir, |_| true)?;
        let total_files = files.len();
        let image_files: Vec<String> = files
            .into_iter()
            .map(|f| f.name)
            .filter(|name| is_image_name(name))
            .collect();
        let database_records = store
            .sample(5)?
            .into_iter()
            .map(|r| DebugRecord {
                expected_filename: r.file_name(),
                id: r.id,
                md5: r.md5,
                file_ext: r.file_ext,
            })
            .collect();
        Ok(DebugInfo {
            static_folder,
            images_dir: images_dir.display().to_string(),
            total_files,
            total_images: image_files.len(),
            sample_files: image_files.into_iter().take(5).collect(),
            database_records,
        })
    })
    .await?;
    Ok(Json(info))
}
