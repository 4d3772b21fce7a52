/*!
# Storysheet

Backend for a small content-management system that keeps its data in a
spreadsheet. An admin console edits stories, uploads cover images, and
manages operator accounts; this crate serves the JSON API behind it.

## Overview

Two tabs of one spreadsheet act as the database:

- **Stories**: one story per row, columns A-L, header on row 1. A story has no
  stored id; its id is its position among the data rows plus one, so ids shift
  when an earlier story is deleted.
- **Users**: one operator account per row, columns A-M, keyed by a generated
  id in column A. Passwords are stored as Argon2 hashes.

## Architecture

### Sheet access
- [`sheet::SheetClient`] is the narrow interface everything else is written
  against: fetch a range, append rows, overwrite a range, resolve a tab's
  numeric id, delete rows.
- [`workbook::LocalWorkbook`] implements it in memory, optionally persisted to
  a gzip-compressed bincode snapshot after every write.
- `google::GoogleSheetsClient` (feature `google`) implements it against the
  Google Sheets v4 REST API using a service account.

### Repositories
- [`stories::StoryRepository`]: list, get, create, update, delete stories.
- [`users::UserRepository`]: user CRUD and password authentication.
- [`session::SessionStore`]: bearer tokens issued at login.

### HTTP layer (feature `web`)
- `app`: axum router, bearer gate, error mapping, graceful shutdown.
- `upload`: image uploads to local disk, served back under `/uploads`.

## Modules

- **codec**: row <-> record conversion for stories and users
- **config**: environment configuration
- **error**: error taxonomy
- **range**: A1 range parsing and formatting
- **session**: login sessions
- **sheet**: backend trait
- **stories**: story repository
- **users**: user repository and password hashing
- **workbook**: local backend and snapshot persistence
- **google**: Google Sheets backend
- **app**: routing and middleware
- **upload**: image upload handling

## REST API Endpoints

- `GET /api/health` - Liveness check
- `GET /api/stories`, `GET /api/stories/:id` - Public story reads
- `POST /api/stories`, `PUT|DELETE /api/stories/:id` - Story writes (bearer)
- `POST /api/upload` - Image upload (bearer)
- `/api/users[/:id]` - User management (bearer, admin or manager)
- `POST /api/users/login`, `POST /api/users/logout` - Sessions
*/

pub mod codec;
pub mod config;
pub mod error;
pub mod range;
pub mod session;
pub mod sheet;
pub mod stories;
pub mod users;
pub mod workbook;

#[cfg(feature = "google")]
pub mod google;

#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod upload;

pub use error::{ConfigError, SheetError, StoreError};
pub use sheet::SheetClient;
