/// Lifecycle of one [`super::PeerSession`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerState {
    /// Connection opened, offer not yet emitted.
    Created,
    /// Local offer handed out, waiting for the answer.
    OfferSent,
    /// Remote answer applied, waiting for connectivity.
    AnswerApplied,
    Connected,
    /// Unusable; the owner must destroy it.
    Failed(String),
    Destroyed,
}

impl PeerState {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::OfferSent => "offer_sent",
            Self::AnswerApplied => "answer_applied",
            Self::Connected => "connected",
            Self::Failed(_) => "failed",
            Self::Destroyed => "destroyed",
        }
    }
}
