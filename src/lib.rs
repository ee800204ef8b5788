pub mod app;
pub mod config;
pub mod dao;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod github;
pub mod http;
pub mod julia;
pub mod labels;
pub mod member;
pub mod output;
pub mod pypi;
pub mod shortener;
pub mod source;
pub mod specifier;
pub mod store;
pub mod submission;
pub mod validation;
