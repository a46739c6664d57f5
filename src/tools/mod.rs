//! 工具层：注册表、按线程的浏览器资源、调度器与各无状态工具

pub mod browser;
pub mod dispatcher;
pub mod filesystem;
pub mod push;
pub mod python;
pub mod registry;
pub mod resource;
pub mod search;
pub mod wikipedia;

#[cfg(feature = "browser")]
pub mod chrome;

pub use browser::{browser_toolkit, toolkit_specs, BrowserSession, HttpBrowser, HttpBrowserFactory};
pub use dispatcher::ToolDispatcher;
pub use filesystem::{file_toolkit, SafeFs};
pub use push::PushNotificationTool;
pub use python::PythonReplTool;
pub use registry::{args_schema, Tool, ToolRegistry, ToolSpec};
pub use resource::{ResourceEntry, ResourceFactory, ResourceManager, ResourceTimeouts};
pub use search::SerperSearchTool;
pub use wikipedia::WikipediaTool;

#[cfg(feature = "browser")]
pub use chrome::ChromeBrowserFactory;
