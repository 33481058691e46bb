//! 工具箱：注册表、执行器、客户目录与五个业务工具

pub mod account;
pub mod customer;
pub mod directory;
pub mod executor;
pub mod expert;
pub mod registry;
pub mod schema;

use std::sync::Arc;

pub use account::{CheckAccountStatusTool, HandoffToSpecialistTool};
pub use customer::{LookupCustomerTool, VerifyAnswerTool};
pub use directory::{AccountStatus, CustomerDirectory, CustomerQuery, CustomerRecord};
pub use executor::ToolExecutor;
pub use expert::RouteToExpertTool;
pub use registry::{Tool, ToolError, ToolRegistry};

pub const LOOKUP_CUSTOMER: &str = "lookup_customer";
pub const VERIFY_ANSWER: &str = "verify_answer";
pub const CHECK_ACCOUNT_STATUS: &str = "check_account_status";
pub const HANDOFF_TO_SPECIALIST: &str = "handoff_to_specialist";
pub const ROUTE_TO_EXPERT: &str = "route_to_expert";

/// 核验成功标记
pub const SUCCESS_MARKER: &str = "VERIFIED";

/// 注册全部业务工具，共享同一份只读目录
pub fn create_registry(directory: Arc<CustomerDirectory>) -> ToolRegistry {
    let mut tools = ToolRegistry::new();
    tools.register(LookupCustomerTool::new(directory.clone()));
    tools.register(VerifyAnswerTool::new(directory.clone()));
    tools.register(CheckAccountStatusTool::new(directory));
    tools.register(HandoffToSpecialistTool);
    tools.register(RouteToExpertTool);
    tools
}
