//! 数据传输对象

pub mod request;
pub mod response;

pub use request::{
    AdjustPointsRequest, CourseCompletionRequest, CreateReferralRequest, HistoryQuery,
    ListReferralsQuery, MessageRequest, RatingRequest, RedeemCodeRequest, RedeemPointsRequest,
    ScheduleRequest, UpdateRestrictionsRequest, UpdateStatusRequest,
};
pub use response::{ApiResponse, BalanceResponse, DeactivateResponse, RedeemCodeResponse};
