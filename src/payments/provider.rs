use crate::payments::error::PaymentResult;
use crate::payments::types::{
    ConfirmPaymentRequest, PaymentConfirmation, PaymentIntent, PaymentIntentRequest, ProviderName,
    RefundRequest, RefundResponse, WebhookEvent, WebhookVerificationResult,
};
use async_trait::async_trait;

/// One payment rail. Implementations own their wire format, signature
/// scheme and webhook vocabulary; callers only see the normalized types.
#[async_trait]
pub trait PaymentProvider: Send + Sync {
    fn name(&self) -> ProviderName;

    /// Header carrying the webhook signature for this rail.
    fn signature_header(&self) -> &'static str;

    fn supports_refunds(&self) -> bool;

    async fn create_payment_intent(
        &self,
        request: PaymentIntentRequest,
    ) -> PaymentResult<PaymentIntent>;

    async fn confirm_payment(
        &self,
        request: ConfirmPaymentRequest,
    ) -> PaymentResult<PaymentConfirmation>;

    async fn refund_payment(&self, request: RefundRequest) -> PaymentResult<RefundResponse>;

    fn verify_webhook(&self, payload: &[u8], signature: &str) -> WebhookVerificationResult;

    /// Errors mean the payload is not an event this rail understands.
    fn parse_webhook_event(&self, payload: &[u8]) -> PaymentResult<WebhookEvent>;
}
