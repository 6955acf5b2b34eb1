use crate::constants::status_groups;
use serde::{Deserialize, Serialize};
use std::fmt;

macro_rules! lifecycle_statuses {
    ($( $(#[$meta:meta])* $code:literal => $variant:ident, $description:literal; )+) => {
        /// Lifecycle status codes reported by the job execution service
        ///
        /// The catalogue is fixed by the execution service. Codes outside it are
        /// kept as [`LifecycleStatus::Unknown`] and treated as still in progress.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "i32", into = "i32")]
        pub enum LifecycleStatus {
            $( $(#[$meta])* $variant, )+
            /// A code not present in the catalogue
            Unknown(i32),
        }

        impl LifecycleStatus {
            /// Every catalogued status in code order
            pub const ALL: &'static [LifecycleStatus] = &[ $( LifecycleStatus::$variant, )+ ];

            pub fn from_code(code: i32) -> Self {
                match code {
                    $( $code => Self::$variant, )+
                    other => Self::Unknown(other),
                }
            }

            pub fn code(&self) -> i32 {
                match self {
                    $( Self::$variant => $code, )+
                    Self::Unknown(code) => *code,
                }
            }

            /// Human readable description shown to analysts
            pub fn description(&self) -> &'static str {
                match self {
                    $( Self::$variant => $description, )+
                    Self::Unknown(_) => "Unknown Status",
                }
            }
        }
    };
}

lifecycle_statuses! {
    /// Parent only
    0 => WaitingForChildSubsToComplete, "Waiting for Child Submissions To Complete";
    1 => WaitingForAgentToTransfer, "Waiting for Agent To Transfer";
    2 => TransferredToPod, "Transferred To Pod";
    3 => PodProcessing, "Pod Processing";
    4 => PodProcessingComplete, "Pod Processing Complete";
    5 => DataOutApprovalBegun, "Data Out Approval Begun";
    6 => DataOutApprovalRejected, "Data Out Rejected";
    7 => DataOutApproved, "Data Out Approved";
    8 => UserNotOnProject, "User Not On Project";
    9 => InvalidUser, "User not authorised for project on TRE";
    10 => TreNotAuthorisedForProject, "TRE Not Authorised For Project";
    /// Terminal, results available
    11 => Completed, "Completed";
    12 => InvalidSubmission, "Invalid Submission";
    13 => CancellingChildren, "Cancelling Children";
    14 => RequestCancellation, "Request Cancellation";
    15 => CancellationRequestSent, "Cancellation Request Sent";
    /// Terminal
    16 => Cancelled, "Cancelled";
    17 => SubmissionWaitingForCrateFormatCheck, "Waiting For Crate Format Check";
    18 => ValidatingUser, "Validating User";
    19 => ValidatingSubmission, "Validating Submission";
    20 => ValidationSuccessful, "Validation Successful";
    21 => AgentTransferringToPod, "Agent Transferring To Pod";
    22 => TransferToPodFailed, "Transfer To Pod Failed";
    23 => TreRejectedProject, "Tre Rejected Project";
    24 => TreApprovedProject, "Tre Approved Project";
    25 => PodProcessingFailed, "Pod Processing Failed";
    /// Parent only
    26 => Running, "Running";
    /// Terminal
    27 => Failed, "Failed";
    28 => SendingSubmissionToHutch, "Sending submission to Hutch";
    29 => RequestingHutchDoesFinalPackaging, "Requesting Hutch packages up final output";
    30 => WaitingForCrate, "Waiting for a Crate";
    31 => FetchingCrate, "Fetching Crate";
    32 => Queued, "Crate queued";
    33 => ValidatingCrate, "Validating Crate";
    34 => FetchingWorkflow, "Fetching workflow";
    35 => StagingWorkflow, "Preparing workflow";
    36 => ExecutingWorkflow, "Executing workflow";
    37 => PreparingOutputs, "Preparing outputs";
    38 => DataOutRequested, "Requested Egress";
    39 => TransferredForDataOut, "Waiting for Egress results";
    40 => PackagingApprovedResults, "Finalising approved results";
    41 => Complete, "Completed";
    42 => Failure, "Failed";
    43 => SubmissionReceived, "Submission has been received";
    44 => SubmissionCrateValidated, "Crate Validated";
    45 => SubmissionCrateValidationFailed, "Crate Failed Validation";
    46 => TreCrateValidated, "Crate Validated";
    47 => TreCrateValidationFailed, "Crate Failed Validation";
    48 => TreWaitingForCrateFormatCheck, "Waiting For Crate Format Check";
    /// Terminal, parent only: some sites returned no result
    49 => PartialResult, "Complete but not all TREs returned a result";
}

impl LifecycleStatus {
    /// Check if the parent job will not change status again
    pub fn is_terminal(&self) -> bool {
        status_groups::END_STATUSES.contains(self)
    }

    /// Check if this terminal status permits result collection
    pub fn is_result_status(&self) -> bool {
        status_groups::RESULT_STATUSES.contains(self)
    }

    pub fn is_known(&self) -> bool {
        !matches!(self, Self::Unknown(_))
    }

    /// Look up a status by its description, ignoring case
    pub fn from_description(description: &str) -> Option<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.description().eq_ignore_ascii_case(description))
    }
}

impl From<i32> for LifecycleStatus {
    fn from(code: i32) -> Self {
        Self::from_code(code)
    }
}

impl From<LifecycleStatus> for i32 {
    fn from(status: LifecycleStatus) -> Self {
        status.code()
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown(code) => write!(f, "Unknown Status ({code})"),
            known => write!(f, "{} - {}", known.code(), known.description()),
        }
    }
}
