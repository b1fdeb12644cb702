use crate::{
    apis::{
        disbursements::{
            classify_rejection, CreateTransferRequest, Transfer, TransferAccepted, TransferOutcome,
            TransferRejection,
        },
        ProviderClientInner,
    },
    common::{IDEMPOTENCY_KEY_HEADER, SUBSCRIPTION_KEY_HEADER, TARGET_ENVIRONMENT_HEADER},
    Error,
};
use reqwest_middleware::RequestBuilder;
use std::sync::Arc;
use urlencoding::encode;
use uuid::Uuid;

/// Provider disbursements API client.
#[derive(Clone, Debug)]
pub struct DisbursementsApi {
    inner: Arc<ProviderClientInner>,
}

impl DisbursementsApi {
    pub(crate) fn new(inner: Arc<ProviderClientInner>) -> Self {
        Self { inner }
    }

    fn provider_headers(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header(
                SUBSCRIPTION_KEY_HEADER,
                self.inner.config.subscription_key.expose_secret(),
            )
            .header(
                TARGET_ENVIRONMENT_HEADER,
                self.inner.config.target_environment.as_str(),
            )
    }

    /// Submits a transfer under the caller's idempotency `reference`.
    ///
    /// Resubmitting with the same reference never creates a second transfer: the
    /// provider answers `409`, which is classified as
    /// [`TransferRejection::DuplicateReference`] and means "already in flight".
    #[tracing::instrument(
        name = "Submit Transfer",
        skip(self, transfer_request),
        fields(
            amount_in_minor = transfer_request.amount_in_minor,
            currency = % transfer_request.currency,
        )
    )]
    pub async fn submit(
        &self,
        reference: Uuid,
        transfer_request: &CreateTransferRequest,
    ) -> Result<TransferOutcome, Error> {
        let builder = self
            .inner
            .client
            .post(
                self.inner
                    .config
                    .base_url
                    .join("/disbursements")
                    .unwrap(),
            )
            .header(IDEMPOTENCY_KEY_HEADER, reference.to_string());

        let res = self
            .provider_headers(builder)
            .json(transfer_request)
            .send()
            .await
            .map_err(Error::from);

        match res {
            Ok(_) => Ok(TransferOutcome::Accepted(TransferAccepted { reference })),
            Err(Error::ApiError(api_error)) if api_error.status != 401 && api_error.status != 403 => {
                Ok(TransferOutcome::Rejected(classify_rejection(&api_error)))
            }
            Err(Error::HttpError(e)) if e.is_timeout() || e.is_connect() => Ok(
                TransferOutcome::Rejected(TransferRejection::ProviderUnavailable),
            ),
            Err(e) => Err(e),
        }
    }

    /// Gets the current provider view of a transfer.
    ///
    /// If the provider holds no transfer under the given reference, `None` is returned.
    #[tracing::instrument(name = "Get Transfer by Reference", skip(self))]
    pub async fn get_by_reference(&self, reference: Uuid) -> Result<Option<Transfer>, Error> {
        let builder = self.inner.client.get(
            self.inner
                .config
                .base_url
                .join(&format!(
                    "/disbursements/{}",
                    encode(&reference.to_string())
                ))
                .unwrap(),
        );

        let res = self
            .provider_headers(builder)
            .send()
            .await
            .map_err(Error::from);

        // Return `None` if the server returned 404
        let transfer = match res {
            Ok(body) => Some(body.json().await?),
            Err(Error::ApiError(api_error)) if api_error.status == 404 => None,
            Err(e) => return Err(e),
        };

        Ok(transfer)
    }
}
