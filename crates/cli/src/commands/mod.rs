// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
pub mod create;
pub mod exec;
pub mod export_proof;
pub mod inspect;
pub mod replay;
pub mod verify;
