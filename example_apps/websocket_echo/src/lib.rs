// Copyright 2015-2024 Swim Inc.
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::error::Error;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

/// Installs a subscriber that logs the engine's events to stdout.
pub fn setup_logging(enable: bool) -> Result<(), Box<dyn Error>> {
    if enable {
        let filter = EnvFilter::from_default_env()
            .add_directive("swimos_websocket=debug".parse()?)
            .add_directive("websocket_echo=debug".parse()?)
            .add_directive(LevelFilter::WARN.into());
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
    Ok(())
}
