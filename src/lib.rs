/*!
# Inventario

Lookup and lending tracker for a physical equipment collection, served as a
small web application.

## Overview

The inventory lives in a spreadsheet maintained by hand. At startup the first
sheet is read into memory, its headers are normalized and a handful of logical
columns (code, description, serial, asset tag, location, document link) are
resolved from whatever spelling the sheet uses. Loan state, the audit log and
user accounts live in a local SQLite file.

## Architecture

### Dataset Loader (`loader`)
- Reads `.xlsx`/`.xls`/`.ods` through calamine, or plain `.csv`
- Skips the title rows above the header row
- `resolve_column` maps candidate header spellings to a column index
- A sheet without a code or description column refuses to load
- For `.xlsx`, link cells are replaced by the hyperlink target behind them (`hyperlinks`)

### State Store (`store`)
- One row per item code: status, holder, loan time, loan counter, last lender/returner
- Append-only audit log of every loan (`prestar`) and return (`devolver`)
- User accounts with an argon2 hash and a role

### Record Resolver (`resolver`, `record`, `photos`)
- Exact, case-insensitive lookup by code
- Substring search over description, serial or asset tag with three outcomes:
  nothing, one record, or a list
- Records merge the row, live loan state, the photo found from the location
  code and the embedded document link

### Presentation (`app`, `login`, web feature)
- axum routes rendering handlebars templates
- Signed session cookie; lending and user administration require the admin role

## REST API Endpoints

- `/` and `/{code}` - Lookup by code (`?codigo=` redirects)
- `/buscar?desc=|serie=|act=` - Substring search
- `/autocomplete?q=&kind=code|desc|serie|act` - Up to 10 suggestions as JSON
- `/fotos/{path}` - Item photos
- `/prestar/{code}`, `/devolver/{code}` - Loan and return (admin)
- `/login`, `/logout`, `/users`, `/users/delete/{username}`, `/auditoria` - Accounts and audit (admin)
*/

pub mod config;
pub mod error;
pub mod hyperlinks;
pub mod loader;
pub mod login;
pub mod photos;
pub mod record;
pub mod resolver;
pub mod store;

#[cfg(feature = "web")]
pub mod app;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use loader::{Dataset, InventoryRow, LogicalColumn};
pub use record::Record;
pub use resolver::{Resolver, SearchOutcome};
pub use store::{AuditEntry, LoanState, LoanStatus, StateStore};
