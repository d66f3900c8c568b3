#![cfg(not(tarpaulin_include))]

use axum::{
    Extension, Form, Json, Router,
    extract::{FromRef, Path, Query, State},
    http::StatusCode,
    middleware,
    response::{Html, IntoResponse, Redirect, Response},
    routing::{get, post},
};
use axum_extra::extract::cookie::{Key, SignedCookieJar};
use handlebars::{Handlebars, handlebars_helper};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha512};
use std::ops::Deref;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::services::ServeDir;

use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::loader::{self, Dataset, LogicalColumn, Summary};
use crate::login::{self, SessionRegistry, User, UserView};
use crate::photos::PhotoLibrary;
use crate::record::{PLACEHOLDER, Record};
use crate::resolver::{self, Resolver, SearchOutcome};
use crate::store::{AuditEntry, LoanStatus, StateStore};

/// Entries shown on the audit page.
const AUDIT_PAGE_LIMIT: usize = 200;
/// Entries shown under a record for admins.
const RECORD_HISTORY_LIMIT: usize = 20;

handlebars_helper!(urlencode: |value: str| urlencoding::encode(value).into_owned());
handlebars_helper!(record_link: |code: str| record_url(code));
handlebars_helper!(photo_url: |path: str| path
    .split('/')
    .map(|segment| urlencoding::encode(segment).into_owned())
    .collect::<Vec<_>>()
    .join("/"));

/// Everything a request needs, built once at startup.
pub struct AppContext {
    pub dataset: Dataset,
    pub store: StateStore,
    pub photos: PhotoLibrary,
    pub sessions: SessionRegistry,
    codes: Vec<String>,
    descriptions: Vec<String>,
    templates: Handlebars<'static>,
    key: Key,
}

impl AppContext {
    /// Assemble the context around an already loaded dataset.
    pub fn new(
        dataset: Dataset,
        store: StateStore,
        photos: PhotoLibrary,
        secret: &str,
    ) -> AppResult<Self> {
        let codes = resolver::sorted_unique(&dataset, LogicalColumn::Code);
        let descriptions = resolver::sorted_unique(&dataset, LogicalColumn::Description);

        Ok(AppContext {
            dataset,
            store,
            photos,
            sessions: SessionRegistry::new(),
            codes,
            descriptions,
            templates: build_templates()?,
            key: Key::from(Sha512::digest(secret.as_bytes()).as_slice()),
        })
    }

    /// Load the inventory, open the state store and seed the administrator.
    ///
    /// Fails when the spreadsheet cannot be read or lacks a mandatory column.
    pub fn from_config(config: &Config) -> AppResult<Self> {
        let dataset = loader::load_inventory(&config.inventory_path, config.header_row)?;
        log::info!(
            "loaded {} rows from {} (columns: {:?})",
            dataset.rows().len(),
            config.inventory_path.display(),
            dataset.columns()
        );

        let store = StateStore::open(&config.database_path)?;
        if login::seed_admin(&store, &config.admin_password)? {
            log::info!("created initial administrator '{}'", login::SEEDED_ADMIN);
        }

        Self::new(
            dataset,
            store,
            PhotoLibrary::new(&config.photo_root),
            &config.secret_key,
        )
    }

    pub fn resolver(&self) -> Resolver<'_> {
        Resolver::new(&self.dataset, &self.store, &self.photos)
    }

    pub fn render<T: Serialize>(&self, name: &str, data: &T) -> AppResult<Html<String>> {
        Ok(Html(self.templates.render(name, data)?))
    }
}

fn build_templates() -> AppResult<Handlebars<'static>> {
    let mut templates = Handlebars::new();
    templates.register_helper("urlencode", Box::new(urlencode));
    templates.register_helper("photo_url", Box::new(photo_url));
    templates.register_helper("record_url", Box::new(record_link));
    templates.register_partial("header", include_str!("./templates/header.hbs"))?;
    templates.register_partial("footer", include_str!("./templates/footer.hbs"))?;
    templates.register_template_string("index", include_str!("./templates/index.hbs"))?;
    templates.register_template_string("confirm", include_str!("./templates/confirm.hbs"))?;
    templates.register_template_string("login", include_str!("./templates/login.hbs"))?;
    templates.register_template_string("users", include_str!("./templates/users.hbs"))?;
    templates.register_template_string("audit", include_str!("./templates/audit.hbs"))?;
    Ok(templates)
}

/// Shared handle given to every handler.
#[derive(Clone)]
pub struct AppState(Arc<AppContext>);

impl AppState {
    pub fn new(ctx: AppContext) -> Self {
        AppState(Arc::new(ctx))
    }
}

impl Deref for AppState {
    type Target = AppContext;

    fn deref(&self) -> &AppContext {
        &self.0
    }
}

impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Key {
        state.0.key.clone()
    }
}

/// Build the router: public lookups, then admin-only routes behind the
/// session gate, then the photo directory.
pub fn router(state: AppState) -> Router {
    let admin = Router::new()
        .route("/prestar/:code", get(loan_form).post(loan_item))
        .route("/devolver/:code", get(return_form).post(return_item))
        .route("/users", get(login::list_users).post(login::handle_create_user))
        .route("/users/delete/:username", post(login::handle_delete_user))
        .route("/auditoria", get(audit_page))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            login::require_admin,
        ));

    Router::new()
        .route("/", get(index))
        .route("/buscar", get(search))
        .route("/autocomplete", get(autocomplete))
        .route(
            "/login",
            get(login::serve_login_page).post(login::handle_login),
        )
        .route("/logout", get(login::handle_logout))
        .route("/:code", get(show_record))
        .merge(admin)
        .nest_service("/fotos", ServeDir::new(state.photos.root()))
        .with_state(state)
}

/// Serve until the process is stopped.
pub async fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
    for name in config.insecure_defaults() {
        log::warn!("{} is not set; using the insecure built-in default", name);
    }

    let state = AppState::new(AppContext::from_config(&config)?);
    let app = router(state);

    let listener = TcpListener::bind(&config.bind_address).await?;
    log::info!("Listening on http://{}", config.bind_address);
    axum::serve(listener, app).await?;

    Ok(())
}

/// First path segments owned by fixed routes. Codes spelled like one of
/// them cannot live at `/{code}` and are shown through `/?codigo=` instead.
const RESERVED_SEGMENTS: [&str; 7] = [
    "buscar",
    "autocomplete",
    "login",
    "logout",
    "users",
    "auditoria",
    "fotos",
];

fn is_reserved(code: &str) -> bool {
    RESERVED_SEGMENTS.contains(&code.trim())
}

fn record_url(code: &str) -> String {
    let code = code.trim();
    if is_reserved(code) {
        format!("/?codigo={}", urlencoding::encode(code))
    } else {
        format!("/{}", urlencoding::encode(code))
    }
}

#[derive(Serialize)]
struct IndexPage<'a> {
    user: Option<UserView>,
    stats: Summary,
    codigos: &'a [String],
    descripciones: &'a [String],
    result: Option<Record>,
    multiples: Vec<Record>,
    history: Vec<AuditEntry>,
    message: Option<String>,
}

impl<'a> IndexPage<'a> {
    fn new(ctx: &'a AppContext, user: Option<&User>) -> Self {
        IndexPage {
            user: user.map(UserView::from),
            stats: ctx.dataset.summary(),
            codigos: &ctx.codes,
            descripciones: &ctx.descriptions,
            result: None,
            multiples: Vec::new(),
            history: Vec::new(),
            message: None,
        }
    }
}

#[derive(Debug, Deserialize)]
struct IndexQuery {
    codigo: Option<String>,
}

async fn index(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<IndexQuery>,
) -> AppResult<Response> {
    let user = login::current_user(&ctx, &jar);
    if let Some(code) = query.codigo.as_deref().filter(|c| !c.trim().is_empty()) {
        if is_reserved(code) {
            return Ok(record_page(&ctx, user.as_ref(), code)?.into_response());
        }
        return Ok(Redirect::to(&record_url(code)).into_response());
    }

    let page = IndexPage::new(&ctx, user.as_ref());
    Ok(ctx.render("index", &page)?.into_response())
}

async fn show_record(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
    Path(code): Path<String>,
) -> AppResult<Html<String>> {
    let user = login::current_user(&ctx, &jar);
    record_page(&ctx, user.as_ref(), &code)
}

/// Index page showing one record, its history for admins, or the
/// not-found message.
fn record_page(ctx: &AppContext, user: Option<&User>, code: &str) -> AppResult<Html<String>> {
    let mut page = IndexPage::new(ctx, user);

    match ctx.resolver().resolve_by_code(code) {
        Ok(record) => {
            if user.is_some_and(User::is_admin) {
                page.history = ctx
                    .store
                    .audit_log(Some(&record.code), RECORD_HISTORY_LIMIT)?;
            }
            page.result = Some(record);
        }
        Err(AppError::NotFound(message)) => page.message = Some(message),
        Err(e) => return Err(e),
    }
    ctx.render("index", &page)
}

#[derive(Debug, Default, Deserialize)]
struct SearchQuery {
    desc: Option<String>,
    serie: Option<String>,
    act: Option<String>,
}

impl SearchQuery {
    /// First non-blank parameter, checked in description, serial, asset order.
    fn criterion(&self) -> Option<(&str, LogicalColumn)> {
        [
            (&self.desc, LogicalColumn::Description),
            (&self.serie, LogicalColumn::Serial),
            (&self.act, LogicalColumn::AssetTag),
        ]
        .into_iter()
        .find_map(|(value, column)| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(|v| (v, column))
        })
    }
}

async fn search(
    State(ctx): State<AppState>,
    jar: SignedCookieJar,
    Query(query): Query<SearchQuery>,
) -> AppResult<Response> {
    let Some((text, column)) = query.criterion() else {
        return Ok(Redirect::to("/").into_response());
    };

    let user = login::current_user(&ctx, &jar);
    let mut page = IndexPage::new(&ctx, user.as_ref());
    match ctx.resolver().search_outcome(text, column)? {
        SearchOutcome::Single(record) if record.code != PLACEHOLDER => {
            return Ok(Redirect::to(&record_url(&record.code)).into_response());
        }
        SearchOutcome::Single(record) => page.multiples = vec![record],
        SearchOutcome::Multiple(records) => page.multiples = records,
        SearchOutcome::NoMatches(message) => page.message = Some(message),
    }
    Ok(ctx.render("index", &page)?.into_response())
}

#[derive(Debug, Deserialize)]
struct AutocompleteQuery {
    #[serde(default)]
    q: String,
    kind: Option<String>,
}

async fn autocomplete(
    State(ctx): State<AppState>,
    Query(query): Query<AutocompleteQuery>,
) -> Json<Vec<String>> {
    let column = match query.kind.as_deref() {
        None => Some(LogicalColumn::Code),
        Some(kind) => LogicalColumn::from_kind(kind),
    };
    match column {
        Some(column) => Json(resolver::suggestions(&ctx.dataset, &query.q, column)),
        None => Json(Vec::new()),
    }
}

#[derive(Serialize)]
struct ConfirmPage {
    user: UserView,
    action: &'static str,
    title: &'static str,
    record: Record,
    error: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct LoanForm {
    #[serde(default)]
    alumno: String,
}

/// Record for a lending route, or the not-found page to answer with.
fn lending_target(ctx: &AppContext, user: &User, code: &str) -> AppResult<Result<Record, Response>> {
    match ctx.resolver().resolve_by_code(code) {
        Ok(record) => Ok(Ok(record)),
        Err(AppError::NotFound(message)) => {
            let mut page = IndexPage::new(ctx, Some(user));
            page.message = Some(message);
            Ok(Err(ctx.render("index", &page)?.into_response()))
        }
        Err(e) => Err(e),
    }
}

fn render_confirm(
    ctx: &AppContext,
    user: &User,
    status: LoanStatus,
    record: Record,
    error: Option<String>,
) -> AppResult<Html<String>> {
    let (action, title) = match status {
        LoanStatus::Loaned => ("prestar", "Prestar"),
        LoanStatus::Available => ("devolver", "Registrar devolución"),
    };
    ctx.render(
        "confirm",
        &ConfirmPage {
            user: UserView::from(user),
            action,
            title,
            record,
            error,
        },
    )
}

/// Confirmation form for a loan or a return.
fn transition_form(ctx: &AppContext, user: &User, code: &str, status: LoanStatus) -> AppResult<Response> {
    let record = match lending_target(ctx, user, code)? {
        Ok(record) => record,
        Err(response) => return Ok(response),
    };
    let error = redundant_transition(&record, status);
    Ok(render_confirm(ctx, user, status, record, error)?.into_response())
}

fn redundant_transition(record: &Record, status: LoanStatus) -> Option<String> {
    match (record.loan.status, status) {
        (LoanStatus::Loaned, LoanStatus::Loaned) => Some(format!(
            "{} ya está prestado a {}.",
            record.code,
            record.loan.holder.as_deref().unwrap_or(PLACEHOLDER)
        )),
        (LoanStatus::Available, LoanStatus::Available) => {
            Some(format!("{} no figura como prestado.", record.code))
        }
        _ => None,
    }
}

/// Apply a loan or a return, then go back to the record.
fn apply_transition(
    ctx: &AppContext,
    user: &User,
    code: &str,
    status: LoanStatus,
    holder: Option<&str>,
) -> AppResult<Response> {
    let record = match lending_target(ctx, user, code)? {
        Ok(record) => record,
        Err(response) => return Ok(response),
    };

    if status == LoanStatus::Loaned && holder.is_none_or(str::is_empty) {
        let error = Some("Indique a quién se presta.".to_string());
        let page = render_confirm(ctx, user, status, record, error)?;
        return Ok((StatusCode::BAD_REQUEST, page).into_response());
    }
    if let Some(error) = redundant_transition(&record, status) {
        let page = render_confirm(ctx, user, status, record, Some(error))?;
        return Ok((StatusCode::CONFLICT, page).into_response());
    }

    ctx.store
        .set_state(&record.code, status, &user.username, holder)?;
    Ok(Redirect::to(&record_url(&record.code)).into_response())
}

async fn loan_form(
    State(ctx): State<AppState>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> AppResult<Response> {
    transition_form(&ctx, &user, &code, LoanStatus::Loaned)
}

async fn loan_item(
    State(ctx): State<AppState>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
    Form(form): Form<LoanForm>,
) -> AppResult<Response> {
    let holder = form.alumno.trim();
    apply_transition(&ctx, &user, &code, LoanStatus::Loaned, Some(holder))
}

async fn return_form(
    State(ctx): State<AppState>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> AppResult<Response> {
    transition_form(&ctx, &user, &code, LoanStatus::Available)
}

async fn return_item(
    State(ctx): State<AppState>,
    Extension(user): Extension<User>,
    Path(code): Path<String>,
) -> AppResult<Response> {
    apply_transition(&ctx, &user, &code, LoanStatus::Available, None)
}

async fn audit_page(
    State(ctx): State<AppState>,
    Extension(user): Extension<User>,
) -> AppResult<Html<String>> {
    let entries = ctx.store.audit_log(None, AUDIT_PAGE_LIMIT)?;
    ctx.render(
        "audit",
        &serde_json::json!({
            "user": UserView::from(&user),
            "entries": entries,
        }),
    )
}
