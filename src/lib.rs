/*!
# learnlab

Backend of an e-learning platform, with the math behind its creative
sandbox widgets.

## Overview

Lessons are ordered collections of cards. A card is either educational
(text plus uploaded media), a test (multiple-choice questions graded on
submission) or a sandbox (an interactive widget: shape drawing, a
color-space converter or a fractal renderer). Lessons may also carry
practical tasks that admins review by hand. Every user's progress is
tracked per lesson: completed cards, best test scores and time spent.

## Architecture

### HTTP layer (feature `web`)
- **Technologies**: axum, tower-http, tokio
- Every JSON response uses the `{success, body, error}` envelope from `api`
- Callers authenticate with a bearer token or the `session` cookie

### Services
- One module per entity cluster, each exposing plain functions over the
  `Store` plus the axum handlers that call them
- The business rule is always the same: authorize, mutate, save, project

### Data Persistence Layer
- The whole database is one serde value, saved as gzip-compressed
  bincode after every successful write
- Uploaded media live as files next to the snapshot

## Modules

- **color**: RGB, HSL, HSV, CMYK, XYZ and LAB conversions
- **fractal**: escape-time, recursive and IFS fractal rendering
- **sandbox**: request forms for the two widgets
- **models** / **store** / **saving**: entities, the locked database and its snapshot
- **auth**: accounts, password hashing, sessions, password reset
- **lessons**, **cards**, **quiz**, **importer**, **tasks**: course content
- **progress**, **tracker**, **profile**: per-user state and recommendations
- **media**: local storage of uploaded files
- **charts**, **export**: progress charts and CSV/XLSX reports
- **assistant**: content generation and web search clients
- **app**: routing, middleware and server startup

## REST API Endpoints

All under `/api`, for example:

- `/auth/login` - Opens a session
- `/lessons/:id/cards` - Lists or creates cards of a lesson
- `/cards/:id/submit` - Grades a test card
- `/tracker` - Accumulates time spent on a lesson
- `/sandbox/fractal` - Renders a fractal to PNG
*/

pub mod auth;
pub mod cards;
pub mod charts;
pub mod color;
pub mod config;
pub mod error;
pub mod export;
pub mod fractal;
pub mod importer;
pub mod lessons;
pub mod media;
pub mod models;
pub mod profile;
pub mod progress;
pub mod quiz;
pub mod sandbox;
pub mod saving;
pub mod store;
pub mod tasks;
pub mod tracker;

#[cfg(feature = "web")]
pub mod api;
#[cfg(feature = "web")]
pub mod app;
#[cfg(feature = "web")]
pub mod assistant;
#[cfg(feature = "web")]
pub mod mailer;

pub use error::{ServiceError, ServiceResult};
pub use store::{Database, Store};
